use crate::flusher::Flusher;
use crate::parser::parse_line;
use crate::sample::Sample;
use crate::serial::LineReader;
use crate::sink::MetricSink;
use anyhow::{Context, Result};
use chrono::Utc;
use std::io::{BufRead, Write};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Reads device lines forever, turning data lines into buffered samples and
/// echoing each sample as a JSON line on `out`.
pub struct AgentLoop<R, W, S> {
    lines: LineReader<R>,
    out: W,
    flusher: Arc<Flusher<S>>,
    read_interval: Duration,
}

impl<R, W, S> AgentLoop<R, W, S>
where
    R: BufRead,
    W: Write,
    S: MetricSink,
{
    pub fn new(reader: R, out: W, flusher: Arc<Flusher<S>>, read_interval: Duration) -> Self {
        Self {
            lines: LineReader::new(reader),
            out,
            flusher,
            read_interval,
        }
    }

    /// Only returns on a fatal error: a failed or closed device read, or a
    /// failed stdout write.
    pub fn run(mut self) -> Result<()> {
        loop {
            self.step()?;
            if !self.read_interval.is_zero() {
                std::thread::sleep(self.read_interval);
            }
        }
    }

    pub fn step(&mut self) -> Result<Option<Sample>> {
        let line = self.lines.next_line()?;
        let Some(reading) = parse_line(&line) else {
            self.flusher
                .stats()
                .lines_ignored
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(line = %line, "ignoring non-data line");
            return Ok(None);
        };

        let sample = Sample::new(Utc::now().timestamp(), &reading);
        self.flusher.submit(sample.clone());

        let encoded = sample.to_json_line().context("encode sample")?;
        writeln!(self.out, "{encoded}").context("write sample to stdout")?;
        self.out.flush().context("flush stdout")?;
        Ok(Some(sample))
    }
}

/// Runs the loop on its own OS thread since device reads block. The receiver
/// resolves with the error that stopped it.
pub fn spawn_agent_thread<R, W, S>(agent: AgentLoop<R, W, S>) -> Result<oneshot::Receiver<Result<()>>>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
    S: MetricSink,
{
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("serial-reader".to_string())
        .spawn(move || {
            let result = agent.run();
            let _ = tx.send(result);
        })
        .context("failed to spawn serial reader thread")?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flusher::tests::{flusher, wait_until, RecordingSink};
    use crate::sample::Sample;
    use std::io::Cursor;

    fn feed(lines: &[&str]) -> Cursor<Vec<u8>> {
        let mut raw = String::new();
        for line in lines {
            raw.push_str(line);
            raw.push_str("\r\n");
        }
        Cursor::new(raw.into_bytes())
    }

    fn output_lines(out: &[u8]) -> Vec<Sample> {
        String::from_utf8(out.to_vec())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn data_line_becomes_sample_and_stdout_line() {
        let sink = RecordingSink::default();
        let flusher = flusher(sink.clone(), 10);
        let mut out = Vec::new();

        let agent = AgentLoop::new(
            feed(&["STA", "OK STA", "CO2=512,HUM=48.30,TMP=22.10"]),
            &mut out,
            flusher.clone(),
            Duration::ZERO,
        );
        let err = agent.run().unwrap_err();
        assert!(err.to_string().contains("closed"));

        let samples = output_lines(&out);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].status.co2_ppm, "512");
        assert_eq!(samples[0].status.humidity, "48.30");
        assert_eq!(samples[0].status.temperature, "22.10");
        assert!(samples[0].time > 1_600_000_000);

        assert_eq!(flusher.buffer().len(), 1);
        let snapshot = flusher.snapshot();
        assert_eq!(snapshot.samples_parsed, 1);
        assert_eq!(snapshot.lines_ignored, 2);
    }

    #[tokio::test]
    async fn non_data_lines_touch_nothing() {
        let sink = RecordingSink::default();
        let flusher = flusher(sink.clone(), 10);
        let mut out = Vec::new();

        let mut agent = AgentLoop::new(feed(&["STA"]), &mut out, flusher.clone(), Duration::ZERO);
        assert_eq!(agent.step().unwrap(), None);
        drop(agent);

        assert!(out.is_empty());
        assert!(flusher.buffer().is_empty());
    }

    #[tokio::test]
    async fn reaching_threshold_flushes_in_background() {
        let sink = RecordingSink::default();
        let flusher = flusher(sink.clone(), 10);
        let lines: Vec<String> = (0..10)
            .map(|i| format!("CO2={},HUM=50.00,TMP=21.{}0", 400 + i, i))
            .collect();
        let line_refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let mut out = Vec::new();

        let agent = AgentLoop::new(feed(&line_refs), &mut out, flusher.clone(), Duration::ZERO);
        assert!(agent.run().is_err());
        assert_eq!(output_lines(&out).len(), 10);

        wait_until(|| sink.batch_count() == 1 && !flusher.in_flight()).await;
        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches[0].len(), 30);
        assert_eq!(batches[0][0].value, 400.0);
        assert_eq!(batches[0][27].value, 409.0);
        drop(batches);
        assert!(flusher.buffer().is_empty());
    }

    #[tokio::test]
    async fn agent_thread_reports_fatal_read_error() {
        let sink = RecordingSink::default();
        let flusher = flusher(sink, 10);
        let agent = AgentLoop::new(
            feed(&["CO2=450,HUM=55.20,TMP=21.30"]),
            std::io::sink(),
            flusher.clone(),
            Duration::ZERO,
        );

        let rx = spawn_agent_thread(agent).unwrap();
        let result = rx.await.unwrap();
        assert!(result.is_err());
        assert_eq!(flusher.buffer().len(), 1);
    }
}
