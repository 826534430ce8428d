use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod activity;
pub mod comment;
pub mod content;
pub mod coupon;
pub mod cart;
pub mod gift;
pub mod live;
pub mod message;
pub mod moderation;
pub mod notification;
pub mod order;
pub mod store;
pub mod user;
pub mod wallet;

pub use activity::{Activity, ActivityKind};
pub use cart::{Cart, CartItem, CartTotals};
pub use comment::{Comment, CommentStatus};
pub use content::{Content, ContentKind, ContentStats, ContentStatus, Like, PostType};
pub use coupon::{Coupon, CouponKind, CouponStatus, CouponUse};
pub use gift::{Gift, GiftCategory, GiftRarity, GiftStatus, GiftTransaction};
pub use live::{
    LiveCategory, LiveHostLock, LivePrivacy, LiveStats, LiveStatus, LiveStream, LiveViewer,
};
pub use message::{
    Conversation, ConversationKind, Message, MessageKind, MessagePreview, MessageStatus,
    Participant, ParticipantRole,
};
pub use moderation::{
    Decision, PriorityLevel, QueueItem, QueueReason, QueueStatus, Report, ReportStatus,
    RiskFactors, TargetKind,
};
pub use notification::{
    Notification, NotificationCampaign, NotificationKind, NotificationPriority, Recipients,
};
pub use order::{
    Address, Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, StatusChange, Tracking,
};
pub use store::{Currency, Product, ProductStatus, Store, StoreStatus};
pub use user::{
    Audience, Follow, Privacy, Role, User, UserKey, UserProfile, UserStats, UserStatus,
};
pub use wallet::{
    TransactionKind, Wallet, WalletStatus, WalletTransaction, Withdrawal, WithdrawalStatus,
};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Random document id
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// `?page=&limit=` query parameters
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

impl PageParams {
    pub fn new(page: usize, limit: usize) -> Self {
        Self {
            page: Some(page),
            limit: Some(limit),
        }
    }

    /// 1-based page number
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> usize {
        (self.page() - 1) * self.limit()
    }
}

/// One page of results
///
/// Callers fetch `limit + 1` rows; the extra row only signals `has_more`.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub limit: usize,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn from_overfetch(mut items: Vec<T>, params: &PageParams) -> Self {
        let limit = params.limit();
        let has_more = items.len() > limit;
        items.truncate(limit);
        Self {
            items,
            page: params.page(),
            limit,
            has_more,
        }
    }

    /// Same paging metadata over different items
    pub fn with_items<U>(self, items: Vec<U>) -> Page<U> {
        Page {
            items,
            page: self.page,
            limit: self.limit,
            has_more: self.has_more,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            limit: self.limit,
            has_more: self.has_more,
        }
    }
}
