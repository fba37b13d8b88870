//! Shared UI icons.
//!
//! Each icon has a plain-text fallback for terminals without emoji support.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");

// Draft content
pub static TEXT: Emoji<'_, '_> = Emoji("📝 ", "[T]");
pub static IMAGE: Emoji<'_, '_> = Emoji("🖼️  ", "[I]");

// Channels
pub static PUSH: Emoji<'_, '_> = Emoji("📡 ", "[push]");
pub static POLL: Emoji<'_, '_> = Emoji("🔄 ", "[poll]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
