//! # Domain Models
//!
//! These structs represent the core entities of DadHub. They are stored as
//! camelCase JSON documents; ids and server timestamps are assigned by the
//! remote store, so both default when absent.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub type Uid = String;

/// A typed document that can be mirrored locally.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Soft-deleted records are kept remotely but hidden from listings.
    fn is_deleted(&self) -> bool {
        false
    }
}

macro_rules! record {
    ($ty:ty) => {
        impl Record for $ty {
            fn id(&self) -> &str {
                &self.id
            }
        }
    };
    ($ty:ty, soft_delete) => {
        impl Record for $ty {
            fn id(&self) -> &str {
                &self.id
            }

            fn is_deleted(&self) -> bool {
                self.deleted
            }
        }
    };
}

/// Gamification counters carried on every identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stats {
    pub points: i64,
    pub xp: i64,
    pub level: u32,
    /// Current daily check-in streak
    pub streak: u32,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            points: 0,
            xp: 0,
            level: 1,
            streak: 0,
        }
    }
}

/// Role flags; written only by the admin store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleFlags {
    pub is_admin: bool,
    pub is_moderator: bool,
    pub is_banned: bool,
}

/// The authenticated user's profile record (`users/{uid}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Identity {
    pub id: Uid,
    pub email: String,
    pub display_name: String,
    /// Avatar token (emoji or uploaded image URL)
    pub avatar: String,
    pub bio: Option<String>,
    #[serde(flatten)]
    pub stats: Stats,
    #[serde(flatten)]
    pub roles: RoleFlags,
    pub ban_reason: Option<String>,
    pub banned_at: Option<DateTime<Utc>>,
    pub banned_by: Option<Uid>,
    /// Ids of the groups this identity belongs to
    pub groups: Vec<String>,
    /// Uids of accepted friends
    pub friends: Vec<Uid>,
    pub referral_code: Option<String>,
    pub referred_by: Option<Uid>,
    pub referral_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

record!(Identity);

/// A discussion board thread starter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscussionPost {
    pub id: String,
    pub author_id: Uid,
    pub author_name: String,
    pub title: String,
    pub content: String,
    pub category: String,
    pub image_url: Option<String>,
    /// Identities that liked the post; the like count is its length
    pub likes: Vec<Uid>,
    /// Emoji -> identities that reacted with it
    pub reactions: BTreeMap<String, Vec<Uid>>,
    pub comment_count: i64,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

record!(DiscussionPost, soft_delete);

impl DiscussionPost {
    pub fn like_count(&self) -> usize {
        self.likes.len()
    }

    pub fn reaction_count(&self, emoji: &str) -> usize {
        self.reactions.get(emoji).map_or(0, Vec::len)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Comment {
    pub id: String,
    pub author_id: Uid,
    pub author_name: String,
    pub text: String,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

record!(Comment, soft_delete);

/// A conversation between participants; messages live in a subcollection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Chat {
    pub id: String,
    pub participants: Vec<Uid>,
    pub last_message: Option<String>,
    pub last_sender_id: Option<Uid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

record!(Chat);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: Uid,
    pub sender_name: String,
    pub text: String,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

record!(ChatMessage, soft_delete);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub owner_id: Uid,
    /// Kept equal to the number of member documents by atomic batches
    pub member_count: i64,
    pub is_private: bool,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

record!(Group, soft_delete);

/// Id shared by everything keyed on an unordered pair of identities.
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}_{b}")
    } else {
        format!("{b}_{a}")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FriendshipStatus {
    #[default]
    Pending,
    Accepted,
}

/// Friend edge (`friendships/{pair_key}`); at most one per pair, whoever asked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Friendship {
    pub id: String,
    /// Both uids, sorted
    pub participants: Vec<Uid>,
    pub requester_id: Uid,
    pub requester_name: String,
    pub addressee_id: Uid,
    pub status: FriendshipStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
}

record!(Friendship);

impl Friendship {
    /// The participant that is not `uid`.
    pub fn other(&self, uid: &str) -> Option<&str> {
        self.participants.iter().map(String::as_str).find(|p| *p != uid)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MemberRole {
    Owner,
    Admin,
    #[default]
    Member,
}

/// Membership edge (`groups/{id}/members/{uid}`); the document id is the uid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupMember {
    pub id: Uid,
    pub display_name: String,
    pub role: MemberRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<DateTime<Utc>>,
}

record!(GroupMember);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupPost {
    pub id: String,
    pub group_id: String,
    pub author_id: Uid,
    pub author_name: String,
    pub content: String,
    pub likes: Vec<Uid>,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

record!(GroupPost, soft_delete);

/// Where a piece of moderated content lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ContentKind {
    #[default]
    Discussion,
    Comment { discussion_id: String },
    GroupPost { group_id: String },
    ChatMessage { chat_id: String },
    Group,
}

impl ContentKind {
    /// Collection path holding content of this kind.
    pub fn collection(&self) -> String {
        use crate::document::collections;
        match self {
            ContentKind::Discussion => collections::DISCUSSIONS.to_string(),
            ContentKind::Comment { discussion_id } => collections::comments(discussion_id),
            ContentKind::GroupPost { group_id } => collections::group_posts(group_id),
            ContentKind::ChatMessage { chat_id } => collections::messages(chat_id),
            ContentKind::Group => collections::GROUPS.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportStatus {
    #[default]
    Pending,
    Resolved,
    Dismissed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentReport {
    pub id: String,
    pub reporter_id: Uid,
    pub content_id: String,
    pub content: ContentKind,
    pub reason: String,
    pub status: ReportStatus,
    pub resolution: Option<String>,
    pub resolved_by: Option<Uid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

record!(ContentReport);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModerationAction {
    #[default]
    BanUser,
    UnbanUser,
    GrantModerator,
    RevokeModerator,
    ResolveReport,
    DismissReport,
    DeleteContent,
}

/// Immutable audit-log entry written alongside every admin mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModerationLogEntry {
    pub id: String,
    pub admin_id: Uid,
    pub target_id: String,
    pub action: ModerationAction,
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

record!(ModerationLogEntry);

/// `referralCodes/{code}`; the document id is the code itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReferralCode {
    pub id: String,
    pub owner_id: Uid,
    pub uses: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

record!(ReferralCode);

/// `referrals/{refereeId}`: at most one per referred identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Referral {
    pub id: Uid,
    pub code: String,
    pub referrer_id: Uid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

record!(Referral);

/// `streaks/{uid}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Streak {
    pub id: Uid,
    pub current: u32,
    pub longest: u32,
    pub last_check_in: Option<NaiveDate>,
}

record!(Streak);

/// `dailySpins/{uid}_{day}`: one per identity and calendar day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DailySpin {
    pub id: String,
    pub user_id: Uid,
    pub day: Option<NaiveDate>,
    pub prize: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

record!(DailySpin);

/// `checkIns/{uid}_{day}`: one per identity and calendar day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DailyCheckIn {
    pub id: String,
    pub user_id: Uid,
    pub day: Option<NaiveDate>,
    pub points: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

record!(DailyCheckIn);

/// Document id of a once-per-day record.
pub fn daily_key(uid: &str, day: NaiveDate) -> String {
    format!("{uid}_{}", day.format("%Y-%m-%d"))
}

/// Aggregates shown on the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub total_users: usize,
    pub admins: usize,
    pub moderators: usize,
    pub banned_users: usize,
    pub total_discussions: usize,
    pub deleted_discussions: usize,
    pub total_groups: usize,
    pub pending_reports: usize,
}
