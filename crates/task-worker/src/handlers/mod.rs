//! Built-in task handlers.
//!
//! Every handler turns its own failures into result text, so a handler
//! never makes the dispatcher requeue a message.

mod process;

pub mod command;
pub mod crawl;
pub mod dns;
pub mod http_get;
pub mod ping;
pub mod word_count;

pub use command::CommandHandler;
pub use crawl::CrawlHandler;
pub use dns::DnsLookupHandler;
pub use http_get::HttpGetHandler;
pub use ping::PingHandler;
pub use word_count::WordCountHandler;
