//! Ephemeris store: the single owner of broadcast ephemerides
use super::{CheckState, Eph};
use crate::prn::Prn;
use log::warn;
use std::collections::HashMap;

/// Outcome of a store insertion
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// became the latest issue for its satellite
    New,
    /// already known (same issue and reference time), dropped
    Duplicate,
    /// older than the stored issue, dropped
    Outdated,
}

#[derive(Debug)]
struct Pair {
    last: Eph,
    prev: Option<Eph>,
}

/// Keeps the two most recent ephemerides per satellite. Readers observe
/// either the previous or the next full issue, never a torn one: the pair
/// is replaced as a whole.
#[derive(Debug, Default)]
pub struct EphStore {
    map: HashMap<Prn, Pair>,
}

impl EphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new ephemeris, keeping the previous issue around
    pub fn put(&mut self, mut eph: Eph) -> PutOutcome {
        if eph.check_state == CheckState::Unchecked {
            eph.check_state = if eph.position(eph.toc).is_ok() {
                CheckState::Ok
            } else {
                CheckState::Bad
            };
        }
        match self.map.get_mut(&eph.prn) {
            None => {
                self.map.insert(eph.prn, Pair { last: eph, prev: None });
                PutOutcome::New
            },
            Some(pair) => {
                if eph.toc == pair.last.toc && eph.iod() == pair.last.iod() {
                    return PutOutcome::Duplicate;
                }
                if eph.toc <= pair.last.toc {
                    warn!("outdated ephemeris {} dropped", eph.prn);
                    return PutOutcome::Outdated;
                }
                let old = std::mem::replace(&mut pair.last, eph);
                pair.prev = Some(old);
                PutOutcome::New
            },
        }
    }

    /// Latest ephemeris of a satellite
    pub fn eph_last(&self, prn: &Prn) -> Option<&Eph> {
        self.map.get(prn).map(|pair| &pair.last)
    }

    /// Previous ephemeris of a satellite
    pub fn eph_prev(&self, prn: &Prn) -> Option<&Eph> {
        self.map.get(prn).and_then(|pair| pair.prev.as_ref())
    }

    pub fn eph_last_mut(&mut self, prn: &Prn) -> Option<&mut Eph> {
        self.map.get_mut(prn).map(|pair| &mut pair.last)
    }

    /// Ephemeris (latest or previous) matching the given issue of data
    pub fn eph_with_iod(&self, prn: &Prn, iod: u32) -> Option<&Eph> {
        let pair = self.map.get(prn)?;
        if pair.last.iod() == iod {
            return Some(&pair.last);
        }
        match &pair.prev {
            Some(prev) if prev.iod() == iod => Some(prev),
            _ => None,
        }
    }

    /// Mutable access to the issue matching `iod`, to attach corrections
    pub fn eph_with_iod_mut(&mut self, prn: &Prn, iod: u32) -> Option<&mut Eph> {
        let pair = self.map.get_mut(prn)?;
        if pair.last.iod() == iod {
            return Some(&mut pair.last);
        }
        match pair.prev {
            Some(ref mut prev) if prev.iod() == iod => Some(prev),
            _ => None,
        }
    }

    /// Satellites currently held
    pub fn prns(&self) -> impl Iterator<Item = &Prn> {
        self.map.keys()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::super::test::gps_eph;
    use super::*;
    use hifitime::Duration;

    #[test]
    fn last_prev_rotation() {
        let mut store = EphStore::new();
        let first = gps_eph();
        let prn = first.prn;
        assert_eq!(store.put(first.clone()), PutOutcome::New);
        assert_eq!(store.put(first.clone()), PutOutcome::Duplicate);

        let mut second = first.clone();
        second.toc = first.toc + Duration::from_seconds(7200.0);
        if let super::super::EphModel::Gps(ref mut gps) = second.model {
            gps.iode = 45.0;
            gps.toe_sec += 7200.0;
        }
        assert_eq!(store.put(second.clone()), PutOutcome::New);
        assert_eq!(store.eph_last(&prn).unwrap().iod(), 45);
        assert_eq!(store.eph_prev(&prn).unwrap().iod(), 44);
        assert!(store.eph_with_iod(&prn, 44).is_some());
        assert!(store.eph_with_iod(&prn, 46).is_none());

        // an old issue arriving late is not stored
        assert_eq!(store.put(first), PutOutcome::Outdated);
    }
}
