pub mod parser;
pub mod rsreader;
