pub mod account;
pub mod notification;
pub mod project;
pub mod resource;
pub mod team;
pub mod ticket;

pub use account::Account;
pub use notification::{NewNotification, Notification, NotificationKind};
pub use project::Project;
pub use resource::{Resource, ResourceAllocation, ResourceHistoryEntry, ResourceRequest};
pub use team::Team;
pub use ticket::{Ticket, TicketAttachment, TicketComment, TicketResource};
