//! Collaborator traits the simulation engine is written against
//!
//! - [`MobilityProvider`]: moves a host through the world
//! - [`EventSource`]: a time-ordered stream of external events

use crate::geometry::Coord;

/// Computes the movement of a single host
///
/// The world calls [`advance`](MobilityProvider::advance) once per tick with
/// the elapsed interval, then reads the new location.
pub trait MobilityProvider {
    /// Advance the model by `dt` units of virtual time
    fn advance(&mut self, dt: f64);

    /// Current location of the host
    fn location(&self) -> Coord;
}

/// A time-ordered source of events
///
/// The scheduler repeatedly asks every source for the time of its next
/// event and pops from the earliest one. An exhausted source reports
/// `f64::INFINITY`.
pub trait EventSource<E> {
    /// Virtual time of the next pending event, `f64::INFINITY` when empty
    fn next_event_time(&self) -> f64;

    /// Remove and return the next pending event
    fn pop_next_event(&mut self) -> Option<E>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "events"
    }
}
