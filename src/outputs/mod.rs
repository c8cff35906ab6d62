//! Everything between a generated post and the Telegram channel.
//!
//! # Submodules
//!
//! - [`markdown`]: Escapes author markup for MarkdownV2 and truncates it without breaking spans
//! - [`telegram`]: Bot API transport and the image downloader used for re-uploads
//! - [`delivery`]: The fallback chain that decides which transport call to make next
//!
//! # Flow
//!
//! ```text
//! PostDraft ──▶ delivery::DeliveryChain
//!                 ├─ markdown::prepare / truncate_plain   (per-state budget)
//!                 └─ telegram::Transport                  (one call per state)
//! ```

pub mod delivery;
pub mod markdown;
pub mod telegram;
