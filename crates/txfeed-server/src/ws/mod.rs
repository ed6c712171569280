mod feed;

pub use feed::ws_feed;
