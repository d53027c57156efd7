// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

#[path = "security/mod.rs"]
pub mod security;

#[path = "giveaways/mod.rs"]
pub mod giveaways;
