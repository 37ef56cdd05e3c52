#[cfg(feature = "browser")]
pub mod browser;
pub mod counter;
pub mod direct;
pub mod fetcher;
pub mod primary;
pub mod process;
pub mod resolver;

#[cfg(test)]
mod test_server;

#[cfg(feature = "browser")]
pub use browser::BrowserExtractor;
pub use counter::RestCounter;
pub use direct::DirectExtractor;
pub use fetcher::ReqwestFetcher;
pub use primary::PrimaryExtractor;
pub use process::ProcessExtractor;
