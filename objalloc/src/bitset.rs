//! Sets of local slots over a fixed universe.
//!
//! Every set taking part in one analysis is created with the same universe
//! (the method's local count when the analysis starts), which is what lets
//! union and difference work word-at-a-time. Slots appended to the method
//! afterwards fall outside the universe; membership queries for them answer
//! `false`.

use std::fmt;

use bit_vec::BitVec;

use crate::ir::LocalId;

/// A set of [`LocalId`]s backed by a bit vector.
#[derive(Clone, PartialEq, Eq)]
pub struct LocalSet {
    bits: BitVec,
}

impl LocalSet {
    /// An empty set over slots `0..universe`.
    pub fn new(universe: usize) -> Self {
        Self { bits: BitVec::from_elem(universe, false) }
    }

    /// A set over `0..universe` holding `locals`.
    pub fn from_locals(universe: usize, locals: impl IntoIterator<Item = LocalId>) -> Self {
        let mut set = Self::new(universe);
        for local in locals {
            set.insert(local);
        }
        set
    }

    /// Size of the universe.
    pub fn universe(&self) -> usize {
        self.bits.len()
    }

    /// Add `local`. Returns true if it was not already present.
    pub fn insert(&mut self, local: LocalId) -> bool {
        let index = local.index();
        debug_assert!(index < self.bits.len(), "{} outside set universe", local);
        match self.bits.get(index) {
            Some(false) => {
                self.bits.set(index, true);
                true
            }
            _ => false,
        }
    }

    /// Remove `local`. Returns true if it was present.
    pub fn remove(&mut self, local: LocalId) -> bool {
        let index = local.index();
        match self.bits.get(index) {
            Some(true) => {
                self.bits.set(index, false);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, local: LocalId) -> bool {
        self.bits.get(local.index()).unwrap_or(false)
    }

    /// `self = self ∪ other`. Returns true if `self` changed.
    pub fn union_with(&mut self, other: &LocalSet) -> bool {
        debug_assert_eq!(self.universe(), other.universe());
        self.bits.or(&other.bits)
    }

    /// `self = self \ other`. Returns true if `self` changed.
    pub fn difference_with(&mut self, other: &LocalSet) -> bool {
        debug_assert_eq!(self.universe(), other.universe());
        self.bits.difference(&other.bits)
    }

    pub fn is_empty(&self) -> bool {
        self.bits.none()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.bits.iter().filter(|bit| *bit).count()
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = LocalId> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, bit)| *bit)
            .map(|(index, _)| LocalId::new(index as u32))
    }

    /// The smallest member, if any.
    pub fn first(&self) -> Option<LocalId> {
        self.iter().next()
    }
}

impl fmt::Debug for LocalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
