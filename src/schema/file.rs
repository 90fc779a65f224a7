//! Flat-file layouts.
//!
//! A [`FileSchema`] describes one physical file: its encoding, its framing
//! (record separator, optional field separator and quote) and the record shapes
//! it may contain. Each shape is a [`Segment`], recognized by a leading
//! discriminator and laid out either as fixed-width columns or as delimited
//! fields. A link forest over segment names describes which records may follow
//! which.

use super::link::{LinkId, LinkSpec, LinkTree};
use crate::config::IoConfig;
use crate::error::{FlatError, flat_error};
use crate::io::record::{RecordFormat, sniff_record_separator, split_fields};
use crate::io::text::TextCodec;
use crate::types::{FieldType, Value};
use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::debug;
use std::path::{Path, PathBuf};

/// Physical layout of a segment's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Contiguous fixed-width columns after the discriminator.
    Fixed,
    /// Fields split by the file's field separator; the discriminator, when
    /// present, is the first field.
    Delimited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self { name: name.into(), ty }
    }

    /// # Errors
    /// Unknown type names and malformed formats are schema errors.
    pub fn parse(name: impl Into<String>, kind: &str, format: &str) -> Result<Self> {
        let name = name.into();
        let ty = FieldType::from_spec(kind, format).with_context(|| format!("field {name}"))?;
        Ok(Self { name, ty })
    }
}

/// A record read from the file, decoded to text.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub bytes: Vec<u8>,
    pub text: String,
    /// Decoded fields when the file is delimited, or the framing error that
    /// kept the record from splitting. `None` without a field separator.
    pub fields: Option<std::result::Result<Vec<String>, FlatError>>,
}

/// A record ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedRecord {
    Fixed(String),
    Delimited(Vec<String>),
}

/// One record shape.
#[derive(Debug, Clone)]
pub struct Segment {
    name: String,
    layout: Layout,
    discriminator: Option<String>,
    fields: IndexMap<String, FieldDef>,
    memo: Option<String>,
}

impl Segment {
    /// # Errors
    /// Duplicate field names, more than one memo field, and (for fixed layouts)
    /// a variable-length field anywhere but last are schema errors.
    pub fn new(
        name: impl Into<String>,
        layout: Layout,
        discriminator: Option<&str>,
        fields: Vec<FieldDef>,
    ) -> Result<Self> {
        let name = name.into();
        let source = format!("segment {name}");
        if name.trim().is_empty() {
            crate::flat_bail!(schema, "file schema", "segment name must not be empty");
        }

        let mut by_name = IndexMap::with_capacity(fields.len());
        let mut memo = None;
        let count = fields.len();
        for (i, field) in fields.into_iter().enumerate() {
            if field.ty.is_memo() {
                if let Some(first) = &memo {
                    crate::flat_bail!(schema, source, "memo fields {first} and {} (at most one allowed)", field.name);
                }
                memo = Some(field.name.clone());
            }
            if layout == Layout::Fixed && i + 1 < count && field.ty.fixed_len().is_none() {
                crate::flat_bail!(
                    schema,
                    source,
                    "field {} has no fixed width; only the last field of a fixed layout may vary",
                    field.name
                );
            }
            if by_name.contains_key(&field.name) {
                crate::flat_bail!(schema, source, "field {} declared twice", field.name);
            }
            by_name.insert(field.name.clone(), field);
        }

        Ok(Self {
            name,
            layout,
            discriminator: discriminator.filter(|d| !d.is_empty()).map(str::to_string),
            fields: by_name,
            memo,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn discriminator(&self) -> Option<&str> {
        self.discriminator.as_deref()
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.values()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn memo_field(&self) -> Option<&str> {
        self.memo.as_deref()
    }

    /// Total record width when every field is fixed.
    pub fn record_width(&self) -> Option<usize> {
        if self.layout != Layout::Fixed {
            return None;
        }
        let disc = self.discriminator.as_deref().map_or(0, |d| d.chars().count());
        self.fields
            .values()
            .map(|f| f.ty.fixed_len())
            .sum::<Option<usize>>()
            .map(|w| w + disc)
    }

    /// Convert a record identified as this segment into field values.
    ///
    /// # Errors
    /// Conversion errors name the offending field.
    pub fn decode(&self, record: &RawRecord, format: &RecordFormat, text: &TextCodec) -> Result<IndexMap<String, Value>> {
        match self.layout {
            Layout::Fixed => self.decode_fixed(&record.text),
            Layout::Delimited => {
                let fields = match &record.fields {
                    Some(Ok(f)) => f.clone(),
                    Some(Err(err)) => return Err(err.clone().into()),
                    None => split_fields(format, &record.bytes)?
                        .iter()
                        .map(|f| text.decode(f))
                        .collect::<Result<Vec<_>>>()?,
                };
                self.decode_delimited(&fields)
            }
        }
    }

    fn decode_fixed(&self, text: &str) -> Result<IndexMap<String, Value>> {
        let chars: Vec<char> = text.chars().collect();
        let mut pos = self.discriminator.as_deref().map_or(0, |d| d.chars().count());
        let last = self.fields.len().saturating_sub(1);
        let mut values = IndexMap::with_capacity(self.fields.len());

        for (i, field) in self.fields.values().enumerate() {
            let start = pos.min(chars.len());
            let raw: String = match field.ty.fixed_len() {
                Some(width) if !(i == last && field.ty.is_memo()) => {
                    let end = pos + width;
                    if end > chars.len() && !matches!(field.ty, FieldType::Alpha(_)) {
                        crate::flat_bail!(
                            conversion,
                            format!("field {}.{}", self.name, field.name),
                            "record ends at character {} before the field ({} characters at {})",
                            chars.len(),
                            width,
                            pos
                        );
                    }
                    pos = end;
                    chars[start..end.min(chars.len())].iter().collect()
                }
                _ => {
                    pos = chars.len();
                    chars[start..].iter().collect()
                }
            };
            let value = field
                .ty
                .parse(&raw)
                .with_context(|| format!("field {}.{}", self.name, field.name))?;
            values.insert(field.name.clone(), value);
        }
        Ok(values)
    }

    fn decode_delimited(&self, fields: &[String]) -> Result<IndexMap<String, Value>> {
        let offset = usize::from(self.discriminator.is_some());
        let mut values = IndexMap::with_capacity(self.fields.len());
        for (i, field) in self.fields.values().enumerate() {
            let raw = fields.get(i + offset).map_or("", String::as_str);
            let value = field
                .ty
                .parse(raw)
                .with_context(|| format!("field {}.{}", self.name, field.name))?;
            values.insert(field.name.clone(), value);
        }
        Ok(values)
    }

    /// Format field values as one record; fields missing from `values` are null.
    ///
    /// # Errors
    /// Conversion errors name the offending field.
    pub fn encode(&self, values: &IndexMap<String, Value>) -> Result<EncodedRecord> {
        let mut parts = Vec::with_capacity(self.fields.len() + 1);
        if let Some(d) = &self.discriminator {
            parts.push(d.clone());
        }
        for field in self.fields.values() {
            let value = values.get(&field.name).unwrap_or(&Value::Null);
            let text = field
                .ty
                .format(value)
                .with_context(|| format!("field {}.{}", self.name, field.name))?;
            parts.push(text);
        }
        Ok(match self.layout {
            Layout::Fixed => EncodedRecord::Fixed(parts.concat()),
            Layout::Delimited => EncodedRecord::Delimited(parts),
        })
    }
}

/// How records are terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSeparator {
    /// Detected from the file when reading; LF when writing.
    Auto,
    Literal(String),
}

/// Expand `\r`, `\n`, `\t` and `\\` in a separator declaration.
pub fn unescape_separator(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

impl RecordSeparator {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("auto") {
            RecordSeparator::Auto
        } else {
            RecordSeparator::Literal(unescape_separator(raw))
        }
    }
}

/// Layout of one flat file.
#[derive(Debug, Clone)]
pub struct FileSchema {
    path: PathBuf,
    text: TextCodec,
    record_separator: RecordSeparator,
    field_separator: Option<String>,
    field_quote: Option<String>,
    chunk_size: Option<usize>,
    segments: IndexMap<String, Segment>,
    links: LinkTree<()>,
}

impl FileSchema {
    pub fn builder(path: impl Into<PathBuf>) -> FileSchemaBuilder {
        FileSchemaBuilder {
            path: path.into(),
            encoding: None,
            record_separator: RecordSeparator::Auto,
            field_separator: None,
            field_quote: None,
            chunk_size: None,
            segments: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The same layout bound to another file.
    pub fn with_path(&self, path: impl Into<PathBuf>) -> Self {
        let mut copy = self.clone();
        copy.path = path.into();
        copy
    }

    pub fn text(&self) -> &TextCodec {
        &self.text
    }

    pub fn record_separator(&self) -> &RecordSeparator {
        &self.record_separator
    }

    pub fn field_separator(&self) -> Option<&str> {
        self.field_separator.as_deref()
    }

    pub fn field_quote(&self) -> Option<&str> {
        self.field_quote.as_deref()
    }

    pub fn chunk_size(&self) -> Option<usize> {
        self.chunk_size
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }

    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments.get(name)
    }

    /// # Errors
    /// Unknown segment names are schema errors.
    pub fn require_segment(&self, name: &str) -> Result<&Segment> {
        self.segments.get(name).ok_or_else(|| {
            FlatError::schema(format!("file {}", self.path.display()), format!("unknown segment {name}")).into()
        })
    }

    pub fn is_multi_segment(&self) -> bool {
        self.segments.len() > 1
    }

    pub fn links(&self) -> &LinkTree<()> {
        &self.links
    }

    pub fn link_of(&self, segment: &str) -> Option<LinkId> {
        self.links.find(segment)
    }

    /// I/O settings for this file: `base` with the file's chunk size override.
    pub fn io_config(&self, base: &IoConfig) -> IoConfig {
        match self.chunk_size {
            Some(n) => base.clone().with_chunk_size(n),
            None => base.clone(),
        }
    }

    /// Framing for reading `path`, detecting the record separator when it is
    /// `auto`.
    ///
    /// # Errors
    /// Separators that cannot be encoded, and sniffing failures, are reported.
    pub fn record_format(&self, path: &Path, config: &IoConfig) -> Result<RecordFormat> {
        let record_separator = match &self.record_separator {
            RecordSeparator::Literal(s) => self.text.encode(s)?,
            RecordSeparator::Auto if path.is_file() => sniff_record_separator(path, config)?,
            RecordSeparator::Auto => b"\n".to_vec(),
        };
        self.framing(record_separator)
            .with_context(|| format!("framing of {}", path.display()))
    }

    /// Framing for writing: `auto` writes LF.
    ///
    /// # Errors
    /// Separators that cannot be encoded are reported.
    pub fn write_format(&self) -> Result<RecordFormat> {
        let record_separator = match &self.record_separator {
            RecordSeparator::Literal(s) => self.text.encode(s)?,
            RecordSeparator::Auto => b"\n".to_vec(),
        };
        self.framing(record_separator)
    }

    fn framing(&self, record_separator: Vec<u8>) -> Result<RecordFormat> {
        let field_separator = self.field_separator.as_deref().map(|s| self.text.encode(s)).transpose()?;
        let field_quote = self.field_quote.as_deref().map(|s| self.text.encode(s)).transpose()?;
        RecordFormat::new(record_separator, field_separator, field_quote)
    }

    /// Decode a framed record.
    ///
    /// A record that does not split into fields is still returned; its
    /// [`RawRecord::fields`] carries the codec error.
    ///
    /// # Errors
    /// Bytes that are not valid in the file's encoding are conversion errors.
    pub fn read_record(&self, format: &RecordFormat, bytes: Vec<u8>) -> Result<RawRecord> {
        let text = self.text.decode(&bytes)?;
        let fields = match format.field_separator() {
            Some(_) => Some(match split_fields(format, &bytes) {
                Ok(parts) => Ok(parts.iter().map(|p| self.text.decode(p)).collect::<Result<Vec<_>>>()?),
                Err(err) => Err(flat_error(&err)
                    .cloned()
                    .unwrap_or_else(|| FlatError::codec("record codec", format!("{err:#}")))),
            }),
            None => None,
        };
        Ok(RawRecord { bytes, text, fields })
    }

    /// The segment a record belongs to; the longest matching discriminator wins.
    pub fn identify(&self, record: &RawRecord) -> Option<&Segment> {
        if self.segments.len() == 1
            && let Some(only) = self.segments.values().next()
            && only.discriminator.is_none()
        {
            return Some(only);
        }
        let mut best: Option<&Segment> = None;
        for segment in self.segments.values() {
            let Some(d) = segment.discriminator.as_deref() else {
                continue;
            };
            let hit = match segment.layout {
                Layout::Fixed => record.text.starts_with(d),
                Layout::Delimited => record
                    .fields
                    .as_ref()
                    .and_then(|f| f.as_ref().ok())
                    .and_then(|f| f.first())
                    .is_some_and(|first| first == d),
            };
            let longer = best
                .and_then(|b| b.discriminator.as_deref())
                .is_none_or(|prev| d.len() > prev.len());
            if hit && longer {
                best = Some(segment);
            }
        }
        best
    }

    /// Whether a text line would be taken for a record header.
    pub fn looks_like_header(&self, format: &RecordFormat, line: &str) -> Result<bool> {
        let record = self.read_record(format, self.text.encode(line)?)?;
        Ok(self.identify(&record).is_some())
    }
}

/// Collects the parts of a [`FileSchema`] and validates them together.
#[derive(Debug, Clone)]
pub struct FileSchemaBuilder {
    path: PathBuf,
    encoding: Option<String>,
    record_separator: RecordSeparator,
    field_separator: Option<String>,
    field_quote: Option<String>,
    chunk_size: Option<usize>,
    segments: Vec<Segment>,
    links: Vec<String>,
}

impl FileSchemaBuilder {
    /// A WHATWG label such as `utf-8` or `windows-1252`; UTF-8 when unset.
    pub fn encoding(mut self, label: impl Into<String>) -> Self {
        self.encoding = Some(label.into());
        self
    }

    /// Literal separator (escapes allowed) or `auto`.
    pub fn record_separator(mut self, separator: &str) -> Self {
        self.record_separator = RecordSeparator::parse(separator);
        self
    }

    pub fn field_separator(mut self, separator: &str) -> Self {
        self.field_separator = Some(unescape_separator(separator));
        self
    }

    pub fn field_quote(mut self, quote: &str) -> Self {
        self.field_quote = Some(unescape_separator(quote));
        self
    }

    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = Some(bytes);
        self
    }

    pub fn segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    /// One line of link notation, such as `HDR` or `.LINE.F`.
    pub fn link(mut self, line: impl Into<String>) -> Self {
        self.links.push(line.into());
        self
    }

    /// # Errors
    /// Any inconsistency between framing, segments and links is a schema error.
    pub fn build(self) -> Result<FileSchema> {
        let source = format!("file {}", self.path.display());
        let text = match &self.encoding {
            Some(label) => TextCodec::for_label(label)?,
            None => TextCodec::default(),
        };
        if self.segments.is_empty() {
            crate::flat_bail!(schema, source, "at least one segment is required");
        }
        if self.field_separator.as_deref() == Some("") {
            crate::flat_bail!(schema, source, "field separator must not be empty");
        }
        if self.field_quote.is_some() && self.field_separator.is_none() {
            crate::flat_bail!(schema, source, "a field quote requires a field separator");
        }
        if self.chunk_size == Some(0) {
            crate::flat_bail!(schema, source, "chunk size must be positive");
        }
        if let RecordSeparator::Literal(s) = &self.record_separator
            && s.is_empty()
        {
            crate::flat_bail!(schema, source, "record separator must not be empty");
        }

        let multi = self.segments.len() > 1;
        let mut segments: IndexMap<String, Segment> = IndexMap::new();
        for segment in self.segments {
            if segment.layout == Layout::Delimited && self.field_separator.is_none() {
                crate::flat_bail!(
                    schema,
                    source,
                    "segment {} is delimited but the file has no field separator",
                    segment.name
                );
            }
            if multi && segment.discriminator.is_none() {
                crate::flat_bail!(
                    schema,
                    source,
                    "segment {} needs a discriminator in a multi-segment file",
                    segment.name
                );
            }
            if let Some(d) = &segment.discriminator
                && let Some(other) = segments.values().find(|s| s.discriminator.as_ref() == Some(d))
            {
                crate::flat_bail!(
                    schema,
                    source,
                    "segments {} and {} share the discriminator {d:?}",
                    other.name,
                    segment.name
                );
            }
            if segments.contains_key(&segment.name) {
                crate::flat_bail!(schema, source, "segment {} declared twice", segment.name);
            }
            segments.insert(segment.name.clone(), segment);
        }

        if !multi
            && let Some(only) = segments.values().next()
            && let Some(memo) = &only.memo
            && only.fields.keys().last() == Some(memo)
        {
            crate::flat_bail!(
                schema,
                source,
                "memo field {}.{memo} cannot be the last field of a single-segment file",
                only.name
            );
        }

        let mut links = LinkTree::new(source.clone());
        if self.links.is_empty() {
            if multi {
                crate::flat_bail!(schema, source, "a multi-segment file needs links between its segments");
            }
            if let Some(only) = segments.keys().next() {
                debug!("{source}: single segment {only} linked as root");
                links.push(&LinkSpec::parse(only)?, ())?;
            }
        } else {
            for line in &self.links {
                let spec = LinkSpec::parse(line).with_context(|| source.clone())?;
                if !segments.contains_key(&spec.target) {
                    crate::flat_bail!(schema, source, "link {spec} names an unknown segment");
                }
                links.push(&spec, ())?;
            }
            if let Some(missing) = segments.keys().find(|name| !links.contains(name)) {
                crate::flat_bail!(schema, source, "segment {missing} is not linked");
            }
        }
        links.check_roots()?;

        Ok(FileSchema {
            path: self.path,
            text,
            record_separator: self.record_separator,
            field_separator: self.field_separator,
            field_quote: self.field_quote,
            chunk_size: self.chunk_size,
            segments,
            links,
        })
    }
}
