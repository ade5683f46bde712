mod fetch;

pub use fetch::FetchCommand;
