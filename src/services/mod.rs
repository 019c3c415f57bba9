// Services module - Business logic

pub mod barcode;
pub mod card_import;
pub mod card_lifecycle;
pub mod card_renderer;
pub mod card_templates;
pub mod encryption;
pub mod patient_registry;
pub mod signature;
