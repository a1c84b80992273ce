use mindroom_core::TeamMode;

/// The outcome of running the dispatch decision algorithm over one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No entity responds to this event.
    Ignore,
    /// A single entity responds.
    HandleWith(String),
    /// Several entities respond, coordinated per `TeamMode`.
    HandleWithTeam(Vec<String>, TeamMode),
    /// Only the router's command handler responds (body starts with `!`).
    RouterCommand,
}
