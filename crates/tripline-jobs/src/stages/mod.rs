//! Stage handler implementations.

pub mod booking;
pub mod classification;
pub mod content;
pub mod trip_detection;

pub use booking::BookingHandler;
pub use classification::ClassificationHandler;
pub use content::ContentHandler;
pub use trip_detection::TripDetectionHandler;
