use getopts::Options;
use log::{error, info};
use statsite_sink::{Label, MetricSink, Sink};
use std::{
    env,
    io::{BufRead, BufReader},
    net::TcpListener,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

struct Generator {
    sink: Arc<Sink>,
    id: String,
    done: Arc<AtomicBool>,
    sent: Arc<AtomicU64>,
}

impl Generator {
    fn run(&self) {
        let labels = [Label::new("producer", self.id.as_str())];
        let mut t0 = Instant::now();
        let mut gauge = 0u64;
        while !self.done.load(Ordering::Relaxed) {
            gauge += 1;
            let t1 = Instant::now();
            let elapsed = t1 - t0;
            self.sink.add_sample_with_labels(&["bench", "loop"], duration_as_millis(elapsed), &labels);
            self.sink.set_gauge_with_labels(&["bench", "total"], gauge as f32, &labels);
            self.sent.fetch_add(2, Ordering::Relaxed);
            t0 = t1;
        }
    }
}

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

pub fn opts() -> Options {
    let mut opts = Options::new();

    opts.optopt("p", "producers", "number of producers", "INTEGER");
    opts.optopt("c", "capacity", "maximum number of queued metrics", "INTEGER");
    opts.optopt("d", "duration", "seconds to run for", "INTEGER");
    opts.optflag("h", "help", "print this help menu");

    opts
}

fn parse_opt(matches: &getopts::Matches, name: &str, default: usize) -> Option<usize> {
    match matches.opt_str(name) {
        None => Some(default),
        Some(raw) => match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                error!("invalid value for --{}: {}", name, raw);
                None
            },
        },
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let program = &args[0];
    let opts = opts();

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            error!("Failed to parse command line args: {}", f);
            return;
        },
    };

    if matches.opt_present("help") {
        print_usage(program, &opts);
        return;
    }

    let (capacity, producers, duration) = match (
        parse_opt(&matches, "capacity", 4096),
        parse_opt(&matches, "producers", 1),
        parse_opt(&matches, "duration", 10),
    ) {
        (Some(c), Some(p), Some(d)) => (c, p, d),
        _ => return,
    };

    info!("statsite sink benchmark");
    info!("producers: {}", producers);
    info!("capacity: {}", capacity);
    info!("duration: {}s", duration);

    // A local server that just counts lines.
    let listener = match TcpListener::bind("127.0.0.1:0") {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind local server: {}", e);
            return;
        },
    };
    let addr = match listener.local_addr() {
        Ok(addr) => addr.to_string(),
        Err(e) => {
            error!("failed to get local server address: {}", e);
            return;
        },
    };
    let received = Arc::new(AtomicU64::new(0));
    {
        let received = Arc::clone(&received);
        thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                for _ in BufReader::new(stream).lines() {
                    received.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
    }

    let sink = Arc::new(Sink::builder().capacity(capacity).build(addr));
    info!("sink configured");

    let done = Arc::new(AtomicBool::new(false));
    let sent = Arc::new(AtomicU64::new(0));
    let handles: Vec<_> = (0..producers)
        .map(|i| {
            let generator = Generator {
                sink: Arc::clone(&sink),
                id: i.to_string(),
                done: Arc::clone(&done),
                sent: Arc::clone(&sent),
            };
            thread::spawn(move || generator.run())
        })
        .collect();

    let mut last_received = 0;
    let mut t0 = Instant::now();
    for _ in 0..duration {
        thread::sleep(Duration::new(1, 0));
        let t1 = Instant::now();

        let total = received.load(Ordering::Relaxed);
        let rate = (total - last_received) as f64 / (t1 - t0).as_secs_f64();
        let stats = sink.stats();
        info!(
            "rate: {:.0} lines per second, state: {}, queued: {}, dropped: {}, discarded: {}",
            rate,
            sink.state(),
            sink.queued(),
            stats.dropped,
            stats.discarded
        );

        last_received = total;
        t0 = t1;
    }

    done.store(true, Ordering::Relaxed);
    for handle in handles {
        let _ = handle.join();
    }
    if !sink.shutdown_timeout(Duration::from_secs(5)) {
        error!("sink worker still busy after 5s");
    }

    let stats = sink.stats();
    info!("total metrics sent: {}", sent.load(Ordering::Relaxed));
    info!("total metrics dropped: {}", stats.dropped);
    info!("total lines received: {}", received.load(Ordering::Relaxed));
}

fn duration_as_millis(d: Duration) -> f32 { d.as_secs_f32() * 1000.0 }
