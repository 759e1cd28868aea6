//! Latest-version resolution
//!
//! Folding a chronology's stamps through a resolver leaves the stamps no
//! other visible stamp supersedes. Usually that is one stamp; more than
//! one means history diverged on paths with no ancestry between them,
//! and every divergent version is returned.

use std::cmp::Reverse;

use tracing::warn;

use tessera_core::{Chronology, Error, Result, Stamp, StampSequence, Stamped, Status, Version};

use super::{PathResolver, RelativePosition};

/// Latest visible value plus any values it contradicts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Latest<T> {
    value: T,
    contradictions: Vec<T>,
}

impl<T> Latest<T> {
    fn from_members(members: Vec<T>) -> Option<Self> {
        let mut members = members.into_iter();
        let value = members.next()?;
        Some(Latest {
            value,
            contradictions: members.collect(),
        })
    }

    /// Most recent member
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Other members, most recent first
    pub fn contradictions(&self) -> &[T] {
        &self.contradictions
    }

    /// Whether history diverged
    pub fn is_contradicted(&self) -> bool {
        !self.contradictions.is_empty()
    }

    /// Number of members, at least one
    pub fn member_count(&self) -> usize {
        1 + self.contradictions.len()
    }

    /// Every member, most recent first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        std::iter::once(&self.value).chain(self.contradictions.iter())
    }

    /// Every member, most recent first
    pub fn into_vec(self) -> Vec<T> {
        let mut members = Vec::with_capacity(self.member_count());
        members.push(self.value);
        members.extend(self.contradictions);
        members
    }
}

impl<T: Clone> Latest<&T> {
    /// Owned copy of every member
    pub fn cloned(&self) -> Latest<T> {
        Latest {
            value: self.value.clone(),
            contradictions: self.contradictions.iter().map(|m| (*m).clone()).collect(),
        }
    }
}

impl PathResolver {
    /// Reduce `candidates` to the stamps nothing else supersedes.
    ///
    /// Off-route candidates are ignored. The result is ordered most recent
    /// first (time, then stamp sequence).
    ///
    /// # Errors
    ///
    /// `MalformedHistory` when strict equal-time checking is on and two
    /// distinct stamps share a path and time.
    pub fn latest_stamps<I>(&self, candidates: I) -> Result<Vec<StampSequence>>
    where
        I: IntoIterator<Item = StampSequence>,
    {
        let mut members: Vec<StampSequence> = Vec::new();

        for candidate in candidates {
            if !self.on_route(candidate) || members.contains(&candidate) {
                continue;
            }

            let positions: Vec<RelativePosition> = members
                .iter()
                .map(|member| self.relative_position(candidate, *member))
                .collect();
            if positions.contains(&RelativePosition::Before) {
                continue;
            }

            for (member, position) in members.iter().zip(&positions) {
                match position {
                    RelativePosition::Equal if self.strict_equal_time => {
                        return Err(Error::MalformedHistory(format!(
                            "{candidate} and {member} share a path and time"
                        )));
                    }
                    RelativePosition::Equal => {
                        warn!(
                            candidate = %candidate,
                            member = %member,
                            "distinct stamps share a path and time, keeping both"
                        );
                    }
                    RelativePosition::Unreachable => {
                        warn!(
                            candidate = %candidate,
                            member = %member,
                            "on-route stamps compared unreachable"
                        );
                    }
                    _ => {}
                }
            }

            let mut next = Vec::with_capacity(members.len() + 1);
            for (member, position) in members.into_iter().zip(positions) {
                if position != RelativePosition::After {
                    next.push(member);
                }
            }
            next.push(candidate);
            members = next;
        }

        let mut keyed: Vec<(StampSequence, Option<Stamp>)> = members
            .into_iter()
            .map(|seq| (seq, self.stamps.stamp(seq)))
            .collect();
        keyed.sort_by_key(|(seq, stamp)| Reverse((stamp.map(|s| s.time), *seq)));
        Ok(keyed.into_iter().map(|(seq, _)| seq).collect())
    }

    /// Latest of any stamped items, keeping those whose stamp passes `keep`
    fn latest_filtered<'a, T, F>(&self, items: &'a [T], keep: F) -> Result<Option<Latest<&'a T>>>
    where
        T: Stamped,
        F: Fn(&Stamp) -> bool,
    {
        let stamps = self.latest_stamps(items.iter().map(Stamped::stamp))?;
        let members: Vec<&'a T> = stamps
            .into_iter()
            .filter(|seq| self.stamps.stamp(*seq).map_or(false, |stamp| keep(&stamp)))
            .filter_map(|seq| items.iter().find(|item| item.stamp() == seq))
            .collect();
        Ok(Latest::from_members(members))
    }

    /// Latest of any stamped items
    pub fn latest<'a, T: Stamped>(&self, items: &'a [T]) -> Result<Option<Latest<&'a T>>> {
        self.latest_filtered(items, |_| true)
    }

    /// Latest versions of `chronology`, `None` if no version is visible
    pub fn latest_versions<'a>(
        &self,
        chronology: &'a Chronology,
    ) -> Result<Option<Latest<&'a Version>>> {
        self.latest(chronology.versions())
    }

    /// Latest versions, dropping any that are not active.
    ///
    /// A component whose latest version retires it yields `None`.
    pub fn latest_active_versions<'a>(
        &self,
        chronology: &'a Chronology,
    ) -> Result<Option<Latest<&'a Version>>> {
        self.latest_filtered(chronology.versions(), |stamp| stamp.status == Status::Active)
    }

    /// Latest versions whose status the coordinate allows
    pub fn latest_visible<'a>(
        &self,
        chronology: &'a Chronology,
    ) -> Result<Option<Latest<&'a Version>>> {
        let coordinate = self.coordinate();
        self.latest_filtered(chronology.versions(), |stamp| coordinate.allows_status(stamp.status))
    }
}
