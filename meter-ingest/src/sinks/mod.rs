pub mod influx_http;
pub mod line_protocol;
pub mod questdb_ilp;

pub use influx_http::InfluxHttpSink;
pub use line_protocol::Point;
pub use questdb_ilp::QuestDbIlpSink;
