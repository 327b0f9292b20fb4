pub mod csv_file;
pub mod http_export;

pub use csv_file::CsvFileSource;
pub use http_export::HttpExportSource;
