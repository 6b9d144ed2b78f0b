use std::time::Duration;

use super::{describe_histogram, Metric, Unit, SPAN_LEVEL};

use metrics::{HistogramFn, Key, KeyName};
use metrics_util::Summary;
use parking_lot::Mutex;
use tracing::{debug, info, span, trace};

#[derive(Clone, Copy)]
pub enum Tag {
    DownloadDuration,
    DecodeDuration,
    DiskExpireDuration,
}

impl Tag {
    pub fn set_global_description(self) {
        describe_histogram!(self.as_str(), self.unit(), self.desc_text());
    }

    pub fn iter() -> TagIter {
        TagIter(Some(Tag::DownloadDuration))
    }

    fn as_str(self) -> &'static str {
        match self {
            Tag::DownloadDuration => "download.duration",
            Tag::DecodeDuration => "decode.duration",
            Tag::DiskExpireDuration => "disk.expire.duration",
        }
    }

    pub fn desc_text(self) -> &'static str {
        match self {
            Self::DownloadDuration => "Time from request dispatch to end-of-stream for one download",
            Self::DecodeDuration => "Time spent turning encoded bytes into an RGBA8 buffer",
            Self::DiskExpireDuration => "Time spent walking and pruning the disk cache directory",
        }
    }

    pub fn unit(self) -> Unit {
        match self {
            Self::DownloadDuration | Self::DecodeDuration | Self::DiskExpireDuration => {
                Unit::Seconds
            }
        }
    }
}

impl From<Tag> for KeyName {
    fn from(tag: Tag) -> Self {
        tag.as_str().into()
    }
}

pub struct TagIter(Option<Tag>);

impl Iterator for TagIter {
    type Item = Tag;

    fn next(&mut self) -> Option<Self::Item> {
        let next = std::mem::take(&mut self.0)?;
        self.0 = match next {
            Tag::DownloadDuration => Some(Tag::DecodeDuration),
            Tag::DecodeDuration => Some(Tag::DiskExpireDuration),
            Tag::DiskExpireDuration => None,
        };
        Some(next)
    }
}

pub struct Handle(pub Mutex<Metric<Summary>>);

impl Handle {
    pub fn new(key: Key, unit: Option<Unit>) -> Self {
        let summary = Summary::with_defaults();
        Self(Metric::new(key, summary, unit))
    }
}

impl HistogramFn for Handle {
    fn record(&self, value: f64) {
        let mut hist = self.0.lock();
        hist.value.add(value);

        let p50 = hist.value.quantile(0.5).expect("Has values");
        let p99 = hist.value.quantile(0.99).expect("Has values");
        let p999 = hist.value.quantile(0.999).expect("Has values");
        let key = hist.key.name();
        let span = span!(SPAN_LEVEL, "histogram", %key);
        let _enter = span.enter();
        // `Duration`s automatically get consumed as seconds by `IntoF64`, so special case
        // `Unit::Seconds` for durations specifically
        if hist.unit == Unit::Seconds {
            let value = Duration::from_secs_f64(value);
            let p50 = Duration::from_secs_f64(p50);
            let p99 = Duration::from_secs_f64(p99);
            let p999 = Duration::from_secs_f64(p999);
            let msg =
                format!("record {value:.02?} | p50 {p50:.02?} | p99 {p99:.02?} | p999 {p999:.02?}");
            if value < p50 {
                trace!("{msg}");
            } else if value < p99 {
                debug!("{msg}");
            } else {
                info!("{msg}");
            }
        } else {
            let unit = hist.unit.as_canonical_label();
            debug!(
                "record {value:.02} | p50 {p50:.02}{unit} | p99 {p99:.02}{unit} | \
                p999 {p999:.02}{unit}"
            );
        }
    }
}
