//! The context data model: elements, windows, sessions, and token counting.
//!
//! | Type | Role |
//! |------|------|
//! | [`ContextElement`] | Immutable unit of content with a cached token count |
//! | [`ContextWindow`] | Ordered elements under a `max - reserved` token budget |
//! | [`Session`] | Named owner of windows |
//! | [`Tokenizer`] | Deterministic token counter used at insertion |

pub mod element;
pub mod session;
pub mod tokenizer;
pub mod window;

pub use element::{
    ContextElement, ElementId, ElementKind, ElementView, Modality, NewElement, DEFAULT_PRIORITY,
    MAX_PRIORITY, MIN_PRIORITY,
};
pub use session::{
    NewSession, Session, SessionDetail, SessionId, SessionInfo, SessionStats, SharedWindow,
};
pub use tokenizer::{CharRatioTokenizer, Tokenizer, DEFAULT_CHARS_PER_TOKEN};
pub use window::{
    AddedElement, ContextWindow, NewWindow, TokenUsage, WindowDetail, WindowId, WindowInfo,
    DEFAULT_MAX_TOKENS, DEFAULT_RESERVED_TOKENS,
};
