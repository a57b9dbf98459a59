//! Core domain types for threadlist
//!
//! These types describe the three joined entities of the conversation store
//! and the items the pager hands to presentation code.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Thread** | One conversation; summarised by [`ThreadSummary`] |
//! | **Recipient** | The contact or group address a thread is routed to |
//! | **Fence** | Server-side term for a group/channel; `fid` is its unique id |
//! | **Partition** | One of the five mutually exclusive list views |
//! | **Segment** | A contiguous slice of a partition's virtual list |
//! | **Paging key** | The stable [`ThreadId`] that addresses a row independent of position |
//!
//! ### Pinned is a view-time property
//!
//! The store keeps a pin rank for ordering, but [`ThreadSummary`] has no pinned
//! flag. Whether a row is pinned is decided by which window returned it and is
//! carried on [`Conversation::Thread`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::partition::GroupMode;

// ============================================
// Identifiers
// ============================================

/// Stable, monotonically assigned thread identifier. This is the paging key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub i64);

impl ThreadId {
    /// Key of the synthetic pinned-section header
    pub const PINNED_HEADER: ThreadId = ThreadId(-1);
    /// Key of the synthetic unpinned-section header
    pub const UNPINNED_HEADER: ThreadId = ThreadId(-2);
    /// Key of the synthetic archived footer
    pub const ARCHIVED_FOOTER: ThreadId = ThreadId(-3);

    /// True for keys reserved by synthetic rows
    pub fn is_synthetic(&self) -> bool {
        self.0 < 0
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a row in the recipients table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(pub i64);

impl std::fmt::Display for RecipientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================
// Recipients
// ============================================

/// Whether a recipient addresses one person or a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientKind {
    Individual,
    Group,
}

impl RecipientKind {
    /// Returns the identifier used in database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientKind::Individual => "individual",
            RecipientKind::Group => "group",
        }
    }
}

impl std::str::FromStr for RecipientKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "individual" => Ok(RecipientKind::Individual),
            "group" => Ok(RecipientKind::Group),
            _ => Err(format!("unknown recipient kind: {}", s)),
        }
    }
}

/// Recipient (contact) settings as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    /// Row id (assigned by the store)
    pub id: RecipientId,
    /// Unique address (user id, phone number or group address)
    pub address: String,
    /// Display name, if known
    pub display_name: Option<String>,
    /// Individual or group
    pub kind: RecipientKind,
    /// Notifications muted
    pub muted: bool,
    /// Blocked by the local user
    pub blocked: bool,
}

// ============================================
// Threads
// ============================================

/// How messages in a thread are distributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionType {
    Broadcast,
    #[default]
    Conversation,
    Archive,
    InboxZero,
}

impl DistributionType {
    /// Numeric code used in database storage
    pub fn code(&self) -> i64 {
        match self {
            DistributionType::Broadcast => 1,
            DistributionType::Conversation => 2,
            DistributionType::Archive => 3,
            DistributionType::InboxZero => 4,
        }
    }

    /// Parse a stored numeric code
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(DistributionType::Broadcast),
            2 => Ok(DistributionType::Conversation),
            3 => Ok(DistributionType::Archive),
            4 => Ok(DistributionType::InboxZero),
            value => Err(Error::UnknownCode {
                kind: "distribution type",
                value,
            }),
        }
    }
}

/// Classification of the most recent event in a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnippetKind {
    /// A regular chat message
    #[default]
    Message,
    /// A group-membership change (join, leave, invite, ...)
    GroupUpdate,
    /// Any other system event
    System,
}

impl SnippetKind {
    /// Returns the identifier used in database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SnippetKind::Message => "message",
            SnippetKind::GroupUpdate => "group_update",
            SnippetKind::System => "system",
        }
    }
}

impl std::str::FromStr for SnippetKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "message" => Ok(SnippetKind::Message),
            "group_update" => Ok(SnippetKind::GroupUpdate),
            "system" => Ok(SnippetKind::System),
            _ => Err(format!("unknown snippet kind: {}", s)),
        }
    }
}

/// Summary of one conversation, as stored in the threads table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    /// Paging key (assigned by the store, never reused)
    pub thread_id: ThreadId,
    /// Recipient the thread is routed to
    pub recipient_id: RecipientId,
    /// Body of the last message or event
    pub snippet: Option<String>,
    /// Kind of the last event
    pub snippet_kind: SnippetKind,
    /// Timestamp of the last message or event
    pub last_message_at: DateTime<Utc>,
    /// Number of unread messages
    pub unread_count: i64,
    /// Archived by the user
    pub archived: bool,
    /// Distribution type
    pub distribution_type: DistributionType,
    /// Fence id when the thread belongs to a group
    pub group_fid: Option<i64>,
    /// Fence event id of the last applied group event
    pub group_eid: Option<i64>,
    /// Opaque payload of the last event
    pub last_event: serde_json::Value,
}

/// Input for recording an event into a thread.
///
/// Used by the ingestion path; a thread is created on the first event for a
/// recipient and updated on every later one.
#[derive(Debug, Clone)]
pub struct ThreadEvent {
    pub recipient_id: RecipientId,
    pub snippet: Option<String>,
    pub snippet_kind: SnippetKind,
    pub at: Option<DateTime<Utc>>,
    /// Increments the unread counter when true (inbound message)
    pub unread: bool,
    pub distribution_type: DistributionType,
    pub group_fid: Option<i64>,
    pub group_eid: Option<i64>,
    pub payload: Option<serde_json::Value>,
}

impl ThreadEvent {
    /// A plain message event for `recipient_id`, timestamped now
    pub fn message(recipient_id: RecipientId, snippet: impl Into<String>) -> Self {
        Self {
            recipient_id,
            snippet: Some(snippet.into()),
            snippet_kind: SnippetKind::Message,
            at: None,
            unread: false,
            distribution_type: DistributionType::default(),
            group_fid: None,
            group_eid: None,
            payload: None,
        }
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = Some(at);
        self
    }

    pub fn in_group(mut self, fid: i64) -> Self {
        self.group_fid = Some(fid);
        self
    }

    pub fn unread(mut self) -> Self {
        self.unread = true;
        self
    }

    /// Mark this event as a group-membership change carrying `payload`
    pub fn group_update(mut self, payload: &GroupChangePayload) -> Self {
        self.snippet_kind = SnippetKind::GroupUpdate;
        self.payload = serde_json::to_value(payload).ok();
        self
    }
}

/// Identities mentioned in a group-membership-change event payload.
///
/// Missing fields default to empty so partially populated payloads still
/// contribute what they have.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupChangePayload {
    #[serde(default)]
    pub actor: Option<RecipientId>,
    #[serde(default)]
    pub added: Vec<RecipientId>,
    #[serde(default)]
    pub removed: Vec<RecipientId>,
    #[serde(default)]
    pub invited: Vec<RecipientId>,
}

impl GroupChangePayload {
    /// Every identity the event refers to, in payload order
    pub fn mentioned(&self) -> impl Iterator<Item = RecipientId> + '_ {
        self.actor
            .iter()
            .copied()
            .chain(self.added.iter().copied())
            .chain(self.removed.iter().copied())
            .chain(self.invited.iter().copied())
    }
}

// ============================================
// Groups (fences)
// ============================================

/// Fence type. Guardian fences form their own partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    #[default]
    Unknown,
    Geo,
    User,
    Guardian,
}

impl GroupType {
    pub fn code(&self) -> i64 {
        match self {
            GroupType::Unknown => 0,
            GroupType::Geo => 1,
            GroupType::User => 2,
            GroupType::Guardian => 3,
        }
    }

    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(GroupType::Unknown),
            1 => Ok(GroupType::Geo),
            2 => Ok(GroupType::User),
            3 => Ok(GroupType::Guardian),
            value => Err(Error::UnknownCode {
                kind: "group type",
                value,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyMode {
    #[default]
    Public,
    Private,
}

impl PrivacyMode {
    pub fn code(&self) -> i64 {
        match self {
            PrivacyMode::Public => 0,
            PrivacyMode::Private => 1,
        }
    }

    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(PrivacyMode::Public),
            1 => Ok(PrivacyMode::Private),
            value => Err(Error::UnknownCode {
                kind: "privacy mode",
                value,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    #[default]
    Many,
    Broadcast,
    BroadcastOneWay,
}

impl DeliveryMode {
    pub fn code(&self) -> i64 {
        match self {
            DeliveryMode::Many => 0,
            DeliveryMode::Broadcast => 1,
            DeliveryMode::BroadcastOneWay => 2,
        }
    }

    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(DeliveryMode::Many),
            1 => Ok(DeliveryMode::Broadcast),
            2 => Ok(DeliveryMode::BroadcastOneWay),
            value => Err(Error::UnknownCode {
                kind: "delivery mode",
                value,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    #[default]
    Open,
    Invite,
    OpenWithKey,
    InviteWithKey,
}

impl JoinMode {
    pub fn code(&self) -> i64 {
        match self {
            JoinMode::Open => 0,
            JoinMode::Invite => 1,
            JoinMode::OpenWithKey => 2,
            JoinMode::InviteWithKey => 3,
        }
    }

    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(JoinMode::Open),
            1 => Ok(JoinMode::Invite),
            2 => Ok(JoinMode::OpenWithKey),
            3 => Ok(JoinMode::InviteWithKey),
            value => Err(Error::UnknownCode {
                kind: "join mode",
                value,
            }),
        }
    }
}

/// A group (fence) and its lifecycle state.
///
/// Reachable by either `fid` or `cname`; both are unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Server-assigned fence id
    pub fid: i64,
    /// Unique human alias
    pub cname: String,
    /// Recipient row that addresses this group
    pub recipient_id: Option<RecipientId>,
    /// Group title
    pub title: Option<String>,
    /// Lifecycle state
    pub mode: GroupMode,
    pub group_type: GroupType,
    pub privacy_mode: PrivacyMode,
    pub delivery_mode: DeliveryMode,
    pub join_mode: JoinMode,
    /// 0 means unlimited
    pub max_members: i64,
    pub owner_user_id: Option<i64>,
    pub members: Vec<RecipientId>,
    pub invited: Vec<RecipientId>,
    pub blocked: Vec<RecipientId>,
    pub updated_at: DateTime<Utc>,
}

impl GroupRecord {
    /// A new record with default attributes
    pub fn new(fid: i64, cname: impl Into<String>, mode: GroupMode) -> Self {
        Self {
            fid,
            cname: cname.into(),
            recipient_id: None,
            title: None,
            mode,
            group_type: GroupType::User,
            privacy_mode: PrivacyMode::default(),
            delivery_mode: DeliveryMode::default(),
            join_mode: JoinMode::default(),
            max_members: 0,
            owner_user_id: None,
            members: vec![],
            invited: vec![],
            blocked: vec![],
            updated_at: Utc::now(),
        }
    }
}

// ============================================
// Paged items
// ============================================

/// A thread summary plus the recipient and group attributes joined to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadRow {
    pub summary: ThreadSummary,
    /// `None` when the recipient row is missing
    pub recipient: Option<Recipient>,
    /// `None` for threads not attached to a fence
    pub group: Option<GroupRecord>,
}

/// One item of a paged conversation list.
#[derive(Debug, Clone, PartialEq)]
pub enum Conversation {
    /// A real conversation. `pinned` reflects the window that returned it.
    Thread { row: Box<ThreadRow>, pinned: bool },
    /// Section header above the pinned rows
    PinnedHeader,
    /// Section header above the unpinned rows (only when pinned rows exist)
    UnpinnedHeader,
    /// Footer row summarising the archived partition
    ArchivedFooter { archived_count: usize },
}

impl Conversation {
    /// Wrap a fetched row
    pub fn thread(row: ThreadRow, pinned: bool) -> Self {
        Conversation::Thread {
            row: Box::new(row),
            pinned,
        }
    }

    /// Stable paging key
    pub fn key(&self) -> ThreadId {
        match self {
            Conversation::Thread { row, .. } => row.summary.thread_id,
            Conversation::PinnedHeader => ThreadId::PINNED_HEADER,
            Conversation::UnpinnedHeader => ThreadId::UNPINNED_HEADER,
            Conversation::ArchivedFooter { .. } => ThreadId::ARCHIVED_FOOTER,
        }
    }

    /// The wrapped summary, `None` for synthetic rows
    pub fn summary(&self) -> Option<&ThreadSummary> {
        match self {
            Conversation::Thread { row, .. } => Some(&row.summary),
            _ => None,
        }
    }

    pub fn is_header(&self) -> bool {
        matches!(
            self,
            Conversation::PinnedHeader | Conversation::UnpinnedHeader
        )
    }

    pub fn is_footer(&self) -> bool {
        matches!(self, Conversation::ArchivedFooter { .. })
    }
}
