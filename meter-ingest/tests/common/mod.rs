#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use meter_ingest::{
    pipeline::{
        Credentials, FetchRequest, RawReadingSource, RawTable, RunSettings, SinkWriteError,
        SourceError, TimeSeriesSink,
    },
    sinks::Point,
    transform::{BadRowPolicy, DstWindow},
};
use time::macros::date;

pub const HEADER: &str = "MPRN,Meter Serial Number,Read Value,Read Type,Read Date and End Time";
pub const MPRN: &str = "10000000001";

/// Export with one row per `(end time, value)`.
pub fn export(rows: &[(&str, f64)]) -> String {
    let mut s = String::from(HEADER);
    for (end, value) in rows {
        s.push_str(&format!(
            "\n{MPRN},000000000024,{value},Active Import Interval (kW),{end}"
        ));
    }
    s.push('\n');
    s
}

pub fn settings() -> RunSettings {
    RunSettings {
        meter_id: MPRN.to_string(),
        credentials: Credentials {
            username: "me@example.com".into(),
            password: "pw".into(),
        },
        measurement: "meter_reading".to_string(),
        run_date: date!(2024 - 11 - 01),
        dst_window: DstWindow::default(),
        bad_row_policy: BadRowPolicy::Abort,
    }
}

pub enum Canned {
    Export(String),
    Unavailable,
    Unauthorized,
}

pub struct StaticSource {
    canned: Canned,
    pub calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(canned: Canned) -> Self {
        Self {
            canned,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn export(body: String) -> Self {
        Self::new(Canned::Export(body))
    }
}

#[async_trait::async_trait]
impl RawReadingSource for StaticSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<RawTable, SourceError> {
        assert_eq!(request.meter_id, MPRN);
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.canned {
            Canned::Export(body) => Ok(RawTable { body: body.clone() }),
            Canned::Unavailable => Err(SourceError::Unavailable("connection reset".into())),
            Canned::Unauthorized => Err(SourceError::Authentication("401 Unauthorized".into())),
        }
    }
}

/// Records every point; fails the writes whose 1-based call number is in `fail_on`.
#[derive(Default)]
pub struct RecordingSink {
    fail_on: HashSet<usize>,
    calls: AtomicUsize,
    points: Mutex<Vec<Point>>,
    closed: AtomicBool,
}

impl RecordingSink {
    pub fn failing_on(calls: &[usize]) -> Self {
        Self {
            fail_on: calls.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn written_values(&self) -> Vec<f64> {
        self.points.lock().unwrap().iter().map(|p| p.value).collect()
    }

    pub fn points(&self) -> Vec<Point> {
        self.points.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TimeSeriesSink for RecordingSink {
    async fn write(&self, point: &Point) -> Result<(), SinkWriteError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.contains(&call) {
            return Err(SinkWriteError("point rejected".into()));
        }
        self.points.lock().unwrap().push(point.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkWriteError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
