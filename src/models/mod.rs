pub mod booking;
pub mod intent;
pub mod knowledge;
pub mod offer;
pub mod session;
pub mod telephony;

pub use booking::{correct_stay_dates, BookingSlots, ReadySlots, SlotError};
pub use intent::{BookingReply, FaqReply, FarewellReply, HandoverReply, StructuredIntent};
pub use knowledge::{Retrieval, RetrievedSnippet};
pub use offer::{select_offer, Offer};
pub use session::{ChatTurn, DialogueState, Role, Session};
