use std::{collections::HashMap, time::Duration};

use time::OffsetDateTime;

use crate::db::{LeaveReason, Member};

/// Whether `after` has passed since `since`. A deadline beyond the calendar
/// never passes.
pub(crate) fn expired(since: OffsetDateTime, after: Duration, now: OffsetDateTime) -> bool {
    time::Duration::try_from(after)
        .ok()
        .and_then(|after| since.checked_add(after))
        .is_some_and(|deadline| deadline < now)
}

/// Joined members of one room, keyed by user.
#[derive(Debug, Clone, Default)]
pub struct MembershipTracker {
    active: HashMap<String, Member>,
}

impl MembershipTracker {
    pub fn active(&self, user_id: &str) -> Option<&Member> {
        self.active.get(user_id)
    }

    pub fn insert(&mut self, member: Member) -> Option<Member> {
        self.active.insert(member.user_id.clone(), member)
    }

    /// Removes the user from the active set and returns the closed record.
    pub fn mark_left(&mut self, user_id: &str, reason: LeaveReason, now: OffsetDateTime) -> Option<Member> {
        let mut member = self.active.remove(user_id)?;
        member.leave(reason, now);
        Some(member)
    }

    pub fn touch_heartbeat(&mut self, user_id: &str, now: OffsetDateTime) -> Option<&Member> {
        let member = self.active.get_mut(user_id)?;
        member.last_heartbeat = now;
        member.updated_at = now;
        Some(member)
    }

    /// Most recently updated first.
    pub fn list(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self.active.values().cloned().collect();
        members.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| b.id.cmp(&a.id)));
        members
    }

    pub fn user_ids(&self) -> Vec<String> {
        let mut users: Vec<String> = self.active.keys().cloned().collect();
        users.sort();
        users
    }

    /// Users whose last heartbeat is older than `timeout` at `now`.
    pub fn stale(&self, now: OffsetDateTime, timeout: Duration) -> Vec<String> {
        let mut users: Vec<String> = self
            .active
            .values()
            .filter(|member| expired(member.last_heartbeat, timeout, now))
            .map(|member| member.user_id.clone())
            .collect();
        users.sort();
        users
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
