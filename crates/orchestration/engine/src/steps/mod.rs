//! Built-in structural steps
//!
//! These steps carry no business logic of their own. They shape the plan:
//! nesting a child, forking children, chaining children, or delegating work
//! to the task executor.

mod delegate;
mod fork;
mod noop;
mod section;
mod section_chain;

pub use delegate::DelegateStep;
pub use fork::ForkStep;
pub use noop::NoopStep;
pub use section::SectionStep;
pub use section_chain::SectionChainStep;
