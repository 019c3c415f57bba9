// Models module - Database entity representations

pub mod audit_log;
pub mod batch;
pub mod card;
pub mod card_template;
pub mod listing;
pub mod patient;

pub use audit_log::AuditLog;
pub use batch::Batch;
pub use card::Card;
pub use card_template::CardTemplate;
pub use patient::Patient;
