pub mod ai;
pub mod alerts;
pub mod booking;
pub mod conversation;
pub mod knowledge;
pub mod location;
pub mod messaging;
pub mod pms;
pub mod prompt;
pub mod report;
pub mod speech;
pub mod texts;
