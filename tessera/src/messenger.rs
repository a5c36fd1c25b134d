/// Messenger is used by layers to notify the application that the map should be redrawn.
pub trait Messenger: Send + Sync {
    /// Requests a redraw of the map.
    fn request_redraw(&self);
}

/// Messenger that ignores all requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyMessenger;

impl Messenger for DummyMessenger {
    fn request_redraw(&self) {}
}
