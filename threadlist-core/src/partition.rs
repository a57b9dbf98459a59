//! Group lifecycle state machine and the partition predicate table
//!
//! A group's [`GroupMode`] is a flat enumeration; the phases are only a
//! grouping for classification. Transitions are driven by server-confirmed
//! [`LifecycleEvent`]s delivered by the ingestion path. The list engine never
//! originates a transition, it only reads the current mode to classify a
//! conversation into a [`Partition`].
//!
//! ## Partition table
//!
//! | Partition | Qualifies when |
//! |-----------|----------------|
//! | Open | mode in {JoinAccepted, GeobasedJoin, JoinSynced, InvitationJoinAccepted, MakeNotConfirmed, LeaveNotConfirmed} |
//! | Invited | mode in {Invitation, GeobasedInvite} |
//! | Left | mode in {LeaveAccepted, LeaveGeoBased} |
//! | Guardian | group type is Guardian |
//! | Archived | thread is archived (mode ignored) |
//!
//! Every partition except Archived additionally requires the thread to be
//! unarchived. Guardian fences are excluded from the three mode partitions so
//! that the five partitions stay mutually exclusive.
//!
//! An unconfirmed leave (`LeaveNotConfirmed`) still counts as Open so an
//! optimistic leave does not make the conversation flicker between lists.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::GroupType;

// ============================================
// Group mode
// ============================================

/// Lifecycle state of a group record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    /// Known only to this device
    DeviceLocal,

    /// Invitation received, not acknowledged
    Invitation,
    /// Invitation based on geo location
    GeobasedInvite,
    /// Removed from a previously invited-to group
    Uninvited,
    /// Invitation rejected by this user
    InvitationRejected,

    /// Server accepted a self-initiated join
    JoinAccepted,
    /// Server accepted joining from an invitation
    InvitationJoinAccepted,
    /// Automatic join based on geo location
    GeobasedJoin,
    /// Waiting for join sync info from the server
    JoinSynced,
    /// Waiting for group creation confirmation
    MakeNotConfirmed,

    /// Leave confirmed
    LeaveAccepted,
    /// Automatic leave when roaming out of a geo group
    LeaveGeoBased,
    /// Leave requested, not yet confirmed
    LeaveNotConfirmed,
    /// Leave requested with local storage cleanup, not yet confirmed
    LeaveNotConfirmedCleanup,
}

/// Phase a mode belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    LocalOnly,
    Invitation,
    Join,
    Leave,
}

impl GroupMode {
    /// All modes, in code order
    pub const ALL: [GroupMode; 14] = [
        GroupMode::DeviceLocal,
        GroupMode::Invitation,
        GroupMode::GeobasedInvite,
        GroupMode::Uninvited,
        GroupMode::InvitationRejected,
        GroupMode::JoinAccepted,
        GroupMode::InvitationJoinAccepted,
        GroupMode::GeobasedJoin,
        GroupMode::JoinSynced,
        GroupMode::MakeNotConfirmed,
        GroupMode::LeaveAccepted,
        GroupMode::LeaveGeoBased,
        GroupMode::LeaveNotConfirmed,
        GroupMode::LeaveNotConfirmedCleanup,
    ];

    /// Numeric code used in database storage
    pub fn code(&self) -> i64 {
        match self {
            GroupMode::DeviceLocal => 0,
            GroupMode::Invitation => 1,
            GroupMode::GeobasedInvite => 2,
            GroupMode::Uninvited => 3,
            GroupMode::JoinAccepted => 10,
            GroupMode::InvitationJoinAccepted => 11,
            GroupMode::GeobasedJoin => 12,
            GroupMode::JoinSynced => 13,
            GroupMode::MakeNotConfirmed => 14,
            GroupMode::InvitationRejected => 15,
            GroupMode::LeaveAccepted => 20,
            GroupMode::LeaveGeoBased => 21,
            GroupMode::LeaveNotConfirmed => 22,
            GroupMode::LeaveNotConfirmedCleanup => 23,
        }
    }

    /// Parse a stored numeric code
    pub fn from_code(code: i64) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.code() == code)
            .ok_or(Error::UnknownCode {
                kind: "group mode",
                value: code,
            })
    }

    pub fn phase(&self) -> LifecyclePhase {
        match self {
            GroupMode::DeviceLocal => LifecyclePhase::LocalOnly,
            GroupMode::Invitation
            | GroupMode::GeobasedInvite
            | GroupMode::Uninvited
            | GroupMode::InvitationRejected => LifecyclePhase::Invitation,
            GroupMode::JoinAccepted
            | GroupMode::InvitationJoinAccepted
            | GroupMode::GeobasedJoin
            | GroupMode::JoinSynced
            | GroupMode::MakeNotConfirmed => LifecyclePhase::Join,
            GroupMode::LeaveAccepted
            | GroupMode::LeaveGeoBased
            | GroupMode::LeaveNotConfirmed
            | GroupMode::LeaveNotConfirmedCleanup => LifecyclePhase::Leave,
        }
    }

    /// Member of the group (joined, or waiting on a join-phase confirmation)
    pub fn is_joined(&self) -> bool {
        self.phase() == LifecyclePhase::Join
    }

    /// A pending invitation exists
    pub fn is_invited(&self) -> bool {
        matches!(self, GroupMode::Invitation | GroupMode::GeobasedInvite)
    }

    /// A leave was requested and the server has not answered yet
    pub fn is_leave_pending(&self) -> bool {
        matches!(
            self,
            GroupMode::LeaveNotConfirmed | GroupMode::LeaveNotConfirmedCleanup
        )
    }

    /// Not a member and no invitation pending
    fn is_outside(&self) -> bool {
        matches!(
            self,
            GroupMode::Uninvited
                | GroupMode::InvitationRejected
                | GroupMode::LeaveAccepted
                | GroupMode::LeaveGeoBased
        )
    }

    /// Partition this mode qualifies for, ignoring the archived flag and the
    /// guardian relation. `None` means the conversation is in no list.
    pub fn partition(&self) -> Option<Partition> {
        [Partition::Open, Partition::Invited, Partition::Left]
            .into_iter()
            .find(|p| p.modes().contains(self))
    }

    /// The mode an event moves this record to, if the event is valid here.
    fn target(self, event: LifecycleEvent) -> Option<GroupMode> {
        use GroupMode as M;
        use LifecycleEvent as E;

        match (self, event) {
            // Creation
            (M::DeviceLocal, E::CreateRequested) => Some(M::MakeNotConfirmed),
            (M::MakeNotConfirmed, E::CreateConfirmed) => Some(M::JoinAccepted),

            // Invitation phase
            (m, E::InviteReceived) if m.is_outside() || m.is_invited() => Some(M::Invitation),
            (m, E::GeoInviteReceived) if m.is_outside() || m.is_invited() => {
                Some(M::GeobasedInvite)
            }
            (m, E::InviteWithdrawn) if m.is_invited() => Some(M::Uninvited),
            (m, E::InvitationRejected) if m.is_invited() => Some(M::InvitationRejected),
            (m, E::InvitationAccepted) if m.is_invited() => Some(M::InvitationJoinAccepted),

            // Join phase. A server join confirmation applies from any mode.
            (_, E::JoinAccepted) => Some(M::JoinAccepted),
            (m, E::GeoJoin) if m.is_outside() || m.is_invited() => Some(M::GeobasedJoin),
            (m, E::JoinSyncRequested) if m.is_joined() && m != M::MakeNotConfirmed => {
                Some(M::JoinSynced)
            }
            (M::JoinSynced, E::JoinSyncCompleted) => Some(M::JoinAccepted),

            // Leave phase
            (m, E::LeaveRequested) if m.is_joined() => Some(M::LeaveNotConfirmed),
            (m, E::LeaveCleanupRequested) if m.is_joined() || m.is_leave_pending() => {
                Some(M::LeaveNotConfirmedCleanup)
            }
            (m, E::LeaveAccepted) if m.is_joined() || m.is_leave_pending() => {
                Some(M::LeaveAccepted)
            }
            (m, E::GeoLeave) if m.is_joined() || m.is_leave_pending() => Some(M::LeaveGeoBased),
            (m, E::LeaveRejected) if m.is_leave_pending() => Some(M::JoinAccepted),

            _ => None,
        }
    }

    /// Apply a server-confirmed lifecycle event.
    ///
    /// Redelivery of an event that targets the current mode is accepted and
    /// leaves the mode unchanged.
    pub fn apply(self, event: LifecycleEvent) -> Result<GroupMode> {
        if event.target_mode() == self {
            return Ok(self);
        }
        self.target(event)
            .ok_or(Error::InvalidTransition { from: self, event })
    }
}

impl std::fmt::Display for GroupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&format!("{:?}", self))
    }
}

// ============================================
// Lifecycle events
// ============================================

/// Server-confirmed lifecycle events that move a group between modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    CreateRequested,
    CreateConfirmed,
    InviteReceived,
    GeoInviteReceived,
    InviteWithdrawn,
    InvitationRejected,
    InvitationAccepted,
    JoinAccepted,
    GeoJoin,
    JoinSyncRequested,
    JoinSyncCompleted,
    LeaveRequested,
    LeaveCleanupRequested,
    LeaveAccepted,
    GeoLeave,
    LeaveRejected,
}

impl LifecycleEvent {
    /// Mode an event always lands in.
    fn target_mode(&self) -> GroupMode {
        match self {
            LifecycleEvent::CreateRequested => GroupMode::MakeNotConfirmed,
            LifecycleEvent::InviteReceived => GroupMode::Invitation,
            LifecycleEvent::GeoInviteReceived => GroupMode::GeobasedInvite,
            LifecycleEvent::InviteWithdrawn => GroupMode::Uninvited,
            LifecycleEvent::InvitationRejected => GroupMode::InvitationRejected,
            LifecycleEvent::InvitationAccepted => GroupMode::InvitationJoinAccepted,
            LifecycleEvent::GeoJoin => GroupMode::GeobasedJoin,
            LifecycleEvent::JoinSyncRequested => GroupMode::JoinSynced,
            LifecycleEvent::LeaveRequested => GroupMode::LeaveNotConfirmed,
            LifecycleEvent::LeaveCleanupRequested => GroupMode::LeaveNotConfirmedCleanup,
            LifecycleEvent::LeaveAccepted => GroupMode::LeaveAccepted,
            LifecycleEvent::GeoLeave => GroupMode::LeaveGeoBased,
            LifecycleEvent::CreateConfirmed
            | LifecycleEvent::JoinAccepted
            | LifecycleEvent::JoinSyncCompleted
            | LifecycleEvent::LeaveRejected => GroupMode::JoinAccepted,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::CreateRequested => "create_requested",
            LifecycleEvent::CreateConfirmed => "create_confirmed",
            LifecycleEvent::InviteReceived => "invite_received",
            LifecycleEvent::GeoInviteReceived => "geo_invite_received",
            LifecycleEvent::InviteWithdrawn => "invite_withdrawn",
            LifecycleEvent::InvitationRejected => "invitation_rejected",
            LifecycleEvent::InvitationAccepted => "invitation_accepted",
            LifecycleEvent::JoinAccepted => "join_accepted",
            LifecycleEvent::GeoJoin => "geo_join",
            LifecycleEvent::JoinSyncRequested => "join_sync_requested",
            LifecycleEvent::JoinSyncCompleted => "join_sync_completed",
            LifecycleEvent::LeaveRequested => "leave_requested",
            LifecycleEvent::LeaveCleanupRequested => "leave_cleanup_requested",
            LifecycleEvent::LeaveAccepted => "leave_accepted",
            LifecycleEvent::GeoLeave => "geo_leave",
            LifecycleEvent::LeaveRejected => "leave_rejected",
        }
    }
}

impl std::str::FromStr for LifecycleEvent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        const ALL: [LifecycleEvent; 16] = [
            LifecycleEvent::CreateRequested,
            LifecycleEvent::CreateConfirmed,
            LifecycleEvent::InviteReceived,
            LifecycleEvent::GeoInviteReceived,
            LifecycleEvent::InviteWithdrawn,
            LifecycleEvent::InvitationRejected,
            LifecycleEvent::InvitationAccepted,
            LifecycleEvent::JoinAccepted,
            LifecycleEvent::GeoJoin,
            LifecycleEvent::JoinSyncRequested,
            LifecycleEvent::JoinSyncCompleted,
            LifecycleEvent::LeaveRequested,
            LifecycleEvent::LeaveCleanupRequested,
            LifecycleEvent::LeaveAccepted,
            LifecycleEvent::GeoLeave,
            LifecycleEvent::LeaveRejected,
        ];
        ALL.into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("unknown lifecycle event: {}", s))
    }
}

// ============================================
// Partitions
// ============================================

/// One of the five mutually exclusive conversation-list views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Open,
    Invited,
    Left,
    Guardian,
    Archived,
}

impl Partition {
    pub const ALL: [Partition; 5] = [
        Partition::Open,
        Partition::Invited,
        Partition::Left,
        Partition::Guardian,
        Partition::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Open => "open",
            Partition::Invited => "invited",
            Partition::Left => "left",
            Partition::Guardian => "guardian",
            Partition::Archived => "archived",
        }
    }

    /// Group modes that qualify for this partition. Empty for the partitions
    /// that are not mode-based.
    pub fn modes(&self) -> &'static [GroupMode] {
        const OPEN: &[GroupMode] = &[
            GroupMode::JoinAccepted,
            GroupMode::GeobasedJoin,
            GroupMode::JoinSynced,
            GroupMode::InvitationJoinAccepted,
            GroupMode::MakeNotConfirmed,
            GroupMode::LeaveNotConfirmed,
        ];
        const INVITED: &[GroupMode] = &[GroupMode::Invitation, GroupMode::GeobasedInvite];
        const LEFT: &[GroupMode] = &[GroupMode::LeaveAccepted, GroupMode::LeaveGeoBased];

        match self {
            Partition::Open => OPEN,
            Partition::Invited => INVITED,
            Partition::Left => LEFT,
            Partition::Guardian | Partition::Archived => &[],
        }
    }

    /// Predicate the store evaluates for this partition
    pub fn predicate(&self) -> PartitionPredicate {
        match self {
            Partition::Open | Partition::Invited | Partition::Left => {
                PartitionPredicate::Modes(self.modes())
            }
            Partition::Guardian => PartitionPredicate::Guardian,
            Partition::Archived => PartitionPredicate::Archived,
        }
    }

    /// Unfiltered query for this partition
    pub fn query(&self) -> ListQuery {
        ListQuery::from(self.predicate())
    }

    /// Whether the list splits into pinned and unpinned windows
    pub fn splits_pinned(&self) -> bool {
        matches!(self, Partition::Open | Partition::Invited)
    }

    /// Classify one conversation from its archived flag and group attributes.
    pub fn classify(archived: bool, group: Option<(GroupMode, GroupType)>) -> Option<Partition> {
        if archived {
            return Some(Partition::Archived);
        }
        match group {
            Some((_, GroupType::Guardian)) => Some(Partition::Guardian),
            Some((mode, _)) => mode.partition(),
            None => None,
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Partition {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Partition::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown partition: {}", s))
    }
}

/// Value-level predicate selecting a partition's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionPredicate {
    /// Unarchived, non-guardian threads whose group mode is in the set
    Modes(&'static [GroupMode]),
    /// Unarchived threads of guardian fences
    Guardian,
    /// Archived threads, regardless of mode
    Archived,
}

impl PartitionPredicate {
    /// Decide whether a row matches, mirroring the SQL the store runs.
    pub fn matches(&self, archived: bool, group: Option<(GroupMode, GroupType)>) -> bool {
        match self {
            PartitionPredicate::Archived => archived,
            PartitionPredicate::Guardian => {
                !archived && matches!(group, Some((_, GroupType::Guardian)))
            }
            PartitionPredicate::Modes(modes) => match group {
                Some((mode, group_type)) => {
                    !archived && group_type != GroupType::Guardian && modes.contains(&mode)
                }
                None => false,
            },
        }
    }
}

/// Search term narrowing a list to threads whose recipient address or display
/// name contains it (ASCII case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientFilter {
    term: String,
}

impl RecipientFilter {
    /// `None` for a blank term, which filters nothing.
    pub fn new(term: &str) -> Option<Self> {
        let term = term.trim();
        if term.is_empty() {
            return None;
        }
        Some(Self {
            term: term.to_string(),
        })
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    /// `LIKE` pattern with `\` as the escape character
    pub fn like_pattern(&self) -> String {
        let mut pattern = String::with_capacity(self.term.len() + 2);
        pattern.push('%');
        for c in self.term.chars() {
            if matches!(c, '%' | '_' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('%');
        pattern
    }
}

/// What a list selects: a partition predicate, optionally narrowed by a
/// recipient search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub predicate: PartitionPredicate,
    pub filter: Option<RecipientFilter>,
}

impl ListQuery {
    pub fn filtered(mut self, filter: Option<RecipientFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn is_filtered(&self) -> bool {
        self.filter.is_some()
    }
}

impl From<PartitionPredicate> for ListQuery {
    fn from(predicate: PartitionPredicate) -> Self {
        Self {
            predicate,
            filter: None,
        }
    }
}
