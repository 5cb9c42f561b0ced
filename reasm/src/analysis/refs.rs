use super::labels::LabelTable;
use crate::error::ReasmError;
use itertools::Itertools;
use std::collections::HashMap;
use std::fmt;

/// max possible targets per referencing site
pub const MAX_REF_TARGET: usize = 4;

/// one instruction site and the addresses it refers to
#[derive(Debug, Clone)]
pub struct Reference {
    pub site: u64,
    pub(crate) targets: [u64; MAX_REF_TARGET],
    pub(crate) count: usize,
}

impl Reference {
    fn new(site: u64) -> Self {
        Self {
            site,
            targets: [0; MAX_REF_TARGET],
            count: 0,
        }
    }

    pub fn targets(&self) -> &[u64] {
        &self.targets[..self.count]
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Ref[{:#0x} -> {}]",
            self.site,
            self.targets().iter().map(|t| format!("{:#0x}", t)).join(", ")
        )
    }
}

#[derive(Debug)]
pub struct ReferenceTable {
    refs: HashMap<u64, Reference>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self {
            refs: HashMap::new(),
        }
    }

    /// record site -> target, counting a use against the target label
    /// the first time the pair shows up
    pub fn insert(
        &mut self,
        site: u64,
        target: u64,
        labels: &mut LabelTable,
    ) -> Result<&Reference, ReasmError> {
        let r = self.refs.entry(site).or_insert_with(|| Reference::new(site));
        if r.targets[..r.count].contains(&target) {
            return Ok(r);
        }
        if r.count == MAX_REF_TARGET {
            return Err(ReasmError::ReferenceOverflow(site, target));
        }
        r.targets[r.count] = target;
        r.count += 1;
        if let Some(l) = labels.find_mut(target) {
            l.uses += 1;
        }
        Ok(r)
    }

    pub fn find(&self, site: u64) -> Option<&Reference> {
        self.refs.get(&site)
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reference> {
        self.refs.values()
    }
}
