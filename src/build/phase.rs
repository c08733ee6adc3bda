use std::fmt;

/// The step a build is in. Observable by hooks and writers; exactly one is
/// active at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BuildPhase {
    #[default]
    Initialization,
    Reading,
    ConsistencyCheck,
    Resolving,
    Writing,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initialization => "initialization",
            Self::Reading => "reading",
            Self::ConsistencyCheck => "consistency check",
            Self::Resolving => "resolving",
            Self::Writing => "writing",
        })
    }
}
