//! Parent/child link forests.
//!
//! Links are declared one per line in an outline notation where the number of
//! leading dots is the depth and an optional suffix carries the flags:
//!
//! ```text
//! HDR          root, mandatory
//! .LINE        child of HDR
//! ..NOTE.F     optional child of LINE
//! .TOTAL.U     unique child of HDR (at most one per HDR)
//! TRAILER.FU   optional, unique second root
//! ```
//!
//! A link attaches to the nearest preceding link one level up. Nodes live in an
//! arena and refer to their parent by index; cycles are rejected when a node is
//! added by walking its would-be ancestors.

use anyhow::Result;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Index of a node in its [`LinkTree`].
pub type LinkId = usize;

static LINK_NOTATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\.*)([^.\s]+)(?:\.([FfUu]{1,2}))?$").expect("link notation regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkFlags {
    /// `F`: the linked segment/table may be absent.
    pub optional: bool,
    /// `U`: at most one occurrence per parent occurrence.
    pub unique: bool,
}

impl fmt::Display for LinkFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.optional, self.unique) {
            (false, false) => Ok(()),
            (true, false) => f.write_str(".F"),
            (false, true) => f.write_str(".U"),
            (true, true) => f.write_str(".FU"),
        }
    }
}

/// One parsed line of link notation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpec {
    pub depth: usize,
    pub target: String,
    pub flags: LinkFlags,
}

impl LinkSpec {
    /// Parse `"...name[.F|U|FU]"`.
    ///
    /// ```
    /// use flatbridge::schema::link::LinkSpec;
    ///
    /// let spec = LinkSpec::parse("..NOTE.FU")?;
    /// assert_eq!(spec.depth, 2);
    /// assert_eq!(spec.target, "NOTE");
    /// assert!(spec.flags.optional && spec.flags.unique);
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    ///
    /// # Errors
    /// Malformed lines are schema errors.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let Some(caps) = LINK_NOTATION.captures(line) else {
            crate::flat_bail!(schema, "link notation", "malformed link {line:?}");
        };
        let flags = match caps.get(3).map(|m| m.as_str().to_ascii_uppercase()) {
            None => LinkFlags::default(),
            Some(f) => match f.as_str() {
                "F" => LinkFlags { optional: true, unique: false },
                "U" => LinkFlags { optional: false, unique: true },
                "FU" | "UF" => LinkFlags { optional: true, unique: true },
                _ => crate::flat_bail!(schema, "link notation", "unknown link flags in {line:?}"),
            },
        };
        Ok(Self {
            depth: caps[1].len(),
            target: caps[2].to_string(),
            flags,
        })
    }
}

impl fmt::Display for LinkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", ".".repeat(self.depth), self.target, self.flags)
    }
}

#[derive(Debug, Clone)]
pub struct LinkNode<K> {
    pub target: String,
    pub depth: usize,
    pub parent: Option<LinkId>,
    pub children: Vec<LinkId>,
    pub flags: LinkFlags,
    /// Side-specific payload (join keys for table links).
    pub payload: K,
}

impl<K> LinkNode<K> {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// A forest of links over named targets, each target linked at most once.
#[derive(Debug, Clone)]
pub struct LinkTree<K> {
    owner: String,
    nodes: Vec<LinkNode<K>>,
    by_target: HashMap<String, LinkId>,
    open: Vec<LinkId>,
}

impl<K> LinkTree<K> {
    /// `owner` names the schema in error messages.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            nodes: Vec::new(),
            by_target: HashMap::new(),
            open: Vec::new(),
        }
    }

    /// Append the next outline line.
    ///
    /// # Errors
    /// A depth that skips a level, a target that is its own ancestor, or a
    /// target linked twice is a schema error.
    pub fn push(&mut self, spec: &LinkSpec, payload: K) -> Result<LinkId> {
        if spec.depth > self.open.len() {
            crate::flat_bail!(
                schema,
                self.owner.clone(),
                "link {spec} skips a level (no open link at depth {})",
                spec.depth.saturating_sub(1)
            );
        }
        let parent = spec.depth.checked_sub(1).map(|d| self.open[d]);
        if let Some(p) = parent {
            let mut walk = Some(p);
            while let Some(a) = walk {
                if self.nodes[a].target == spec.target {
                    crate::flat_bail!(
                        schema,
                        self.owner.clone(),
                        "link {spec} would make {} depend on itself",
                        spec.target
                    );
                }
                walk = self.nodes[a].parent;
            }
        }
        if self.by_target.contains_key(&spec.target) {
            crate::flat_bail!(schema, self.owner.clone(), "{} is linked more than once", spec.target);
        }

        let id = self.nodes.len();
        self.nodes.push(LinkNode {
            target: spec.target.clone(),
            depth: spec.depth,
            parent,
            children: Vec::new(),
            flags: spec.flags,
            payload,
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(id);
        }
        self.by_target.insert(spec.target.clone(), id);
        self.open.truncate(spec.depth);
        self.open.push(id);
        Ok(id)
    }

    /// At most one mandatory root.
    ///
    /// # Errors
    /// Returns a schema error naming the competing roots.
    pub fn check_roots(&self) -> Result<()> {
        let mandatory: Vec<&str> = self
            .roots()
            .filter(|id| !self.nodes[*id].flags.optional)
            .map(|id| self.nodes[id].target.as_str())
            .collect();
        if mandatory.len() > 1 {
            crate::flat_bail!(
                schema,
                self.owner.clone(),
                "only one unconditional root link is allowed, found {}",
                mandatory.join(", ")
            );
        }
        Ok(())
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: LinkId) -> &LinkNode<K> {
        &self.nodes[id]
    }

    pub fn find(&self, target: &str) -> Option<LinkId> {
        self.by_target.get(target).copied()
    }

    pub fn contains(&self, target: &str) -> bool {
        self.by_target.contains_key(target)
    }

    pub fn iter(&self) -> impl Iterator<Item = (LinkId, &LinkNode<K>)> {
        self.nodes.iter().enumerate()
    }

    pub fn roots(&self) -> impl Iterator<Item = LinkId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent.is_none())
            .map(|(id, _)| id)
    }

    pub fn parent(&self, id: LinkId) -> Option<LinkId> {
        self.nodes[id].parent
    }

    pub fn parent_target(&self, target: &str) -> Option<&str> {
        let id = self.find(target)?;
        self.nodes[id].parent.map(|p| self.nodes[p].target.as_str())
    }

    /// Ancestors of `id`, nearest first, `id` excluded.
    pub fn ancestors(&self, id: LinkId) -> impl Iterator<Item = LinkId> + '_ {
        std::iter::successors(self.nodes[id].parent, |a| self.nodes[*a].parent)
    }

    pub fn is_ancestor(&self, ancestor: LinkId, of: LinkId) -> bool {
        self.ancestors(of).any(|a| a == ancestor)
    }

    /// Root of the tree containing `id`.
    pub fn root_of(&self, id: LinkId) -> LinkId {
        self.ancestors(id).last().unwrap_or(id)
    }

    /// Node ids from the root down to `id`, inclusive.
    pub fn path_from_root(&self, id: LinkId) -> Vec<LinkId> {
        let mut path: Vec<LinkId> = self.ancestors(id).collect();
        path.reverse();
        path.push(id);
        path
    }
}
