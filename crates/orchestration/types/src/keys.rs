//! Registry keys
//!
//! Each registrable kind is looked up by its own key type, so a facilitator
//! key can never be used to obtain an adviser. Built-in keys are constants.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

macro_rules! registry_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Cow<'static, str>);

        impl $name {
            pub fn new(key: impl Into<String>) -> Self {
                Self(Cow::Owned(key.into()))
            }

            pub const fn from_static(key: &'static str) -> Self {
                Self(Cow::Borrowed(key))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&'static str> for $name {
            fn from(key: &'static str) -> Self {
                Self::from_static(key)
            }
        }
    };
}

registry_key!(
    /// Key of a step implementation
    StepType
);

registry_key!(
    /// Key of a facilitator
    FacilitatorType
);

registry_key!(
    /// Key of an adviser
    AdviserType
);

registry_key!(
    /// Kind of referenced output
    RefType
);

registry_key!(
    /// Timeout dimension
    Dimension
);

impl FacilitatorType {
    pub const SYNC: Self = Self::from_static("SYNC");
    pub const ASYNC: Self = Self::from_static("ASYNC");
    pub const TASK: Self = Self::from_static("TASK");
    pub const TASK_CHAIN: Self = Self::from_static("TASK_CHAIN");
    pub const CHILD: Self = Self::from_static("CHILD");
    pub const CHILDREN: Self = Self::from_static("CHILDREN");
    pub const CHILD_CHAIN: Self = Self::from_static("CHILD_CHAIN");
}

impl AdviserType {
    pub const ON_SUCCESS: Self = Self::from_static("ON_SUCCESS");
    pub const ON_FAIL: Self = Self::from_static("ON_FAIL");
    pub const RETRY: Self = Self::from_static("RETRY");
    pub const IGNORE: Self = Self::from_static("IGNORE");
    pub const MANUAL_INTERVENTION: Self = Self::from_static("MANUAL_INTERVENTION");
    pub const MARK_SUCCESS: Self = Self::from_static("MARK_SUCCESS");
    pub const ABORT: Self = Self::from_static("ABORT");
    pub const ROLLBACK: Self = Self::from_static("ROLLBACK");
}

impl RefType {
    pub const OUTCOME: Self = Self::from_static("OUTCOME");
    pub const SWEEPING_OUTPUT: Self = Self::from_static("SWEEPING_OUTPUT");
}

impl Dimension {
    /// Wall-clock time since the node started executing
    pub const ABSOLUTE: Self = Self::from_static("ABSOLUTE");
    /// Executing time, excluding time spent paused
    pub const ACTIVE: Self = Self::from_static("ACTIVE");
}
