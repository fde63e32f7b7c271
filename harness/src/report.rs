use std::io::{self, Write};
use std::time::{Duration, Instant};

use crate::{
    bootstrap::{self, Capability},
    error::BenchError,
};

pub fn format_elapsed(elapsed: Duration) -> String {
    format!("--- {} seconds ---", elapsed.as_secs_f64())
}

/// The only output a successful run writes to stdout.
pub fn write_pass<W: Write>(out: &mut W, elapsed: Duration) -> io::Result<()> {
    writeln!(out, "PASS")?;
    writeln!(out, "{}", format_elapsed(elapsed))?;
    out.flush()
}

/// Bootstraps `capability`, then times `bench` from device creation to the
/// final barrier and reports to `out`. Nothing is written unless the run
/// succeeds.
pub fn timed_run<C, W, F>(
    capability: &mut C,
    out: &mut W,
    bench: F,
) -> Result<Duration, BenchError>
where
    C: Capability,
    W: Write,
    F: FnOnce(C::Handle) -> Result<(), BenchError>,
{
    let handle = bootstrap::ensure(capability)?;

    let start = Instant::now();
    bench(handle)?;
    let elapsed = start.elapsed();

    write_pass(out, elapsed)?;
    Ok(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        add_bench,
        bootstrap::{BootstrapError, ProvisionError},
        test_utills::{skip_without_device, small_config, Preloaded},
    };

    struct Missing;

    impl Capability for Missing {
        type Handle = ();
        type Error = &'static str;

        fn name(&self) -> &str {
            "missing"
        }

        fn acquire(&mut self) -> Result<(), &'static str> {
            Err("not installed")
        }

        fn provision(&mut self) -> Result<(), ProvisionError> {
            Err(ProvisionError::NoInstaller)
        }
    }

    fn parse_seconds(line: &str) -> f64 {
        line.strip_prefix("--- ")
            .and_then(|l| l.strip_suffix(" seconds ---"))
            .unwrap()
            .parse()
            .unwrap()
    }

    #[test]
    fn pass_then_seconds() {
        let mut out = Vec::new();
        write_pass(&mut out, Duration::from_millis(1500)).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "PASS\n--- 1.5 seconds ---\n"
        );
    }

    #[test]
    fn seconds_parse_back() {
        let line = format_elapsed(Duration::from_micros(12_345_678));
        assert!((parse_seconds(&line) - 12.345678).abs() < 1e-9);
        assert_eq!(format_elapsed(Duration::ZERO), "--- 0 seconds ---");
    }

    #[test]
    fn run_writes_exactly_two_lines() {
        let mut out = Vec::new();
        let elapsed = timed_run(&mut Preloaded(()), &mut out, |()| {
            std::thread::sleep(Duration::from_millis(5));
            Ok(())
        })
        .unwrap();

        let stdout = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = stdout.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "PASS");
        assert!(stdout.ends_with('\n'));
        assert_eq!(parse_seconds(lines[1]), elapsed.as_secs_f64());
        assert!(elapsed >= Duration::from_millis(5));
    }

    #[test]
    fn failed_run_writes_nothing() {
        let mut out = Vec::new();
        let err = timed_run(&mut Preloaded(()), &mut out, |()| {
            Err(BenchError::VerifyMismatch {
                index: 0,
                expected: 2.0,
                actual: 0.0,
            })
        })
        .unwrap_err();

        assert!(matches!(err, BenchError::VerifyMismatch { .. }));
        assert!(out.is_empty());
    }

    #[test]
    fn bootstrap_failure_skips_the_run() {
        let mut out = Vec::new();
        let mut ran = false;
        let err = timed_run(&mut Missing, &mut out, |()| {
            ran = true;
            Ok(())
        })
        .unwrap_err();

        assert!(matches!(
            err,
            BenchError::Bootstrap(BootstrapError::Provision { .. })
        ));
        assert!(!ran);
        assert!(out.is_empty());
    }

    #[test]
    fn elapsed_grows_with_iterations() {
        let Some(entry) = crate::test_utills::test_entry() else {
            return;
        };

        let time_for = |iterations| {
            let config = small_config(512, iterations);
            let mut out = Vec::new();
            let result = timed_run(&mut Preloaded(entry.clone()), &mut out, |entry| {
                add_bench::run(&config, entry)
            });
            skip_without_device(result).map(|elapsed| {
                let stdout = String::from_utf8(out).unwrap();
                let secs = parse_seconds(stdout.lines().nth(1).unwrap());
                assert_eq!(secs, elapsed.as_secs_f64());
                secs
            })
        };

        let Some(short) = time_for(5) else {
            return;
        };
        let Some(long) = time_for(200) else {
            return;
        };
        assert!(long >= short, "{long} < {short}");
    }
}
