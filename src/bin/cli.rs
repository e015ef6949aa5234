use audiopipe::{
    clock::{monotonic_nanos, sleep_for_nanos, NANOS_PER_MILLISECOND, NANOS_PER_SECOND},
    error::AudioError,
    AudioService, CallbackResult, ClientStream, Direction, LocalServiceLink, Result, ServiceConfig,
    ServiceListener, ServiceLink, SimulatedDeviceProvider, SocketServiceLink, StreamBuilder, StreamState,
};
use clap::{App, Arg, ArgMatches, SubCommand};
use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

const DEFAULT_SOCKET: &str = "/tmp/audiopipe.sock";

fn main() -> Result<()> {
    env_logger::init();

    let socket_arg = || {
        Arg::with_name("socket")
            .short("s")
            .long("socket")
            .value_name("PATH")
            .help("Service socket path")
            .default_value(DEFAULT_SOCKET)
            .takes_value(true)
    };
    let seconds_arg = || {
        Arg::with_name("seconds")
            .short("t")
            .long("seconds")
            .value_name("SECONDS")
            .help("How long to run")
            .default_value("2")
            .takes_value(true)
    };

    let matches = App::new("audiopipe-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Shared-memory audio stream service and test client")
        .subcommand(
            SubCommand::with_name("serve")
                .about("Run the audio service with simulated devices")
                .arg(socket_arg()),
        )
        .subcommand(
            SubCommand::with_name("play")
                .about("Connect to a running service and play a sine tone")
                .arg(socket_arg())
                .arg(seconds_arg())
                .arg(
                    Arg::with_name("frequency")
                        .short("f")
                        .long("frequency")
                        .value_name("HZ")
                        .help("Tone frequency")
                        .default_value("440")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("capacity")
                        .short("c")
                        .long("capacity")
                        .value_name("FRAMES")
                        .help("Requested buffer capacity (0 = default)")
                        .default_value("0")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("loopback")
                .about("Run service and client in one process and print statistics")
                .arg(seconds_arg())
                .arg(
                    Arg::with_name("callback")
                        .long("callback")
                        .help("Use a data callback instead of blocking writes"),
                ),
        )
        .subcommand(SubCommand::with_name("info").about("Show version and build information"))
        .get_matches();

    match matches.subcommand() {
        ("serve", Some(serve_matches)) => serve(serve_matches),
        ("play", Some(play_matches)) => play(play_matches),
        ("loopback", Some(loopback_matches)) => loopback(loopback_matches),
        ("info", Some(_)) => show_info(),
        _ => {
            println!("Use --help for usage information");
            Ok(())
        }
    }
}

fn parse_arg<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<T> {
    matches
        .value_of(name)
        .ok_or_else(|| AudioError::illegal_argument(name, "Missing value"))?
        .parse()
        .map_err(|_| AudioError::illegal_argument(name, "Invalid value"))
}

fn serve(matches: &ArgMatches) -> Result<()> {
    let socket: String = parse_arg(matches, "socket")?;
    let service = AudioService::new(Arc::new(SimulatedDeviceProvider::new()), ServiceConfig::from_env())?;
    let listener = ServiceListener::bind(&socket, service)?;
    println!("Serving on {} (Ctrl-C to stop)", listener.path().display());
    listener.serve()
}

/// Fills interleaved i16 frames with a sine tone
struct ToneGenerator {
    phase: f64,
    increment: f64,
}

impl ToneGenerator {
    fn new(frequency: f64, sample_rate: i32) -> Self {
        Self {
            phase: 0.0,
            increment: 2.0 * std::f64::consts::PI * frequency / sample_rate as f64,
        }
    }

    fn fill(&mut self, samples: &mut [i16], channels: usize) {
        for frame in samples.chunks_mut(channels.max(1)) {
            let value = (self.phase.sin() * 0.25 * i16::MAX as f64) as i16;
            frame.fill(value);
            self.phase = (self.phase + self.increment) % (2.0 * std::f64::consts::PI);
        }
    }
}

fn play(matches: &ArgMatches) -> Result<()> {
    let socket: String = parse_arg(matches, "socket")?;
    let seconds: f64 = parse_arg(matches, "seconds")?;
    let frequency: f64 = parse_arg(matches, "frequency")?;
    let capacity: i32 = parse_arg(matches, "capacity")?;

    let link: Arc<dyn ServiceLink> = SocketServiceLink::connect(&socket)?;
    let stream = StreamBuilder::new()
        .direction(Direction::Output)
        .buffer_capacity(capacity)
        .error_callback(|error| eprintln!("Stream error: {}", error))
        .open(link)?;
    print_configuration(&stream);

    let stats = write_tone(&stream, frequency, seconds)?;
    println!("Wrote {} frames, {} xruns", stats, stream.xrun_count());
    stream.close()
}

fn write_tone(stream: &ClientStream, frequency: f64, seconds: f64) -> Result<i64> {
    let burst = stream.frames_per_burst() as usize;
    let channels = stream.channel_count() as usize;
    let mut tone = ToneGenerator::new(frequency, stream.sample_rate());
    let mut samples = vec![0i16; burst * channels];
    let timeout = stream.calculate_reasonable_timeout(burst as i64);

    stream.request_start()?;
    stream.wait_for_state_change(StreamState::Starting, timeout)?;

    let end = monotonic_nanos() + (seconds * NANOS_PER_SECOND as f64) as i64;
    while monotonic_nanos() < end {
        tone.fill(&mut samples, channels);
        let written = stream.write_samples(&samples, burst, timeout)?;
        if written < burst {
            log::warn!("Short write: {} of {} frames", written, burst);
        }
    }

    stream.request_stop()?;
    stream.wait_for_state_change(StreamState::Stopping, timeout)?;
    Ok(stream.frames_written())
}

fn loopback(matches: &ArgMatches) -> Result<()> {
    let seconds: f64 = parse_arg(matches, "seconds")?;
    let service = AudioService::new(Arc::new(SimulatedDeviceProvider::new()), ServiceConfig::from_env())?;
    let link: Arc<dyn ServiceLink> = LocalServiceLink::connect(service.clone(), std::process::id() as i32)?;

    if matches.is_present("callback") {
        let callbacks = Arc::new(AtomicU64::new(0));
        let counter = callbacks.clone();
        let mut tone: Option<ToneGenerator> = None;
        let stream = StreamBuilder::new()
            .sample_callback::<i16, _>(move |samples, frames| {
                let channels = samples.len() / frames.max(1);
                tone.get_or_insert_with(|| ToneGenerator::new(440.0, 48_000))
                    .fill(samples, channels);
                counter.fetch_add(1, Ordering::Relaxed);
                CallbackResult::Continue
            })
            .open(link)?;
        print_configuration(&stream);

        stream.request_start()?;
        sleep_for_nanos((seconds * NANOS_PER_SECOND as f64) as i64);
        stream.request_stop()?;
        stream.wait_for_state_change(StreamState::Stopping, NANOS_PER_SECOND)?;
        println!(
            "Callbacks: {}, frames written: {}, frames read: {}, xruns: {}",
            callbacks.load(Ordering::Relaxed),
            stream.frames_written(),
            stream.frames_read(),
            stream.xrun_count()
        );
        stream.close()?;
    } else {
        let stream = StreamBuilder::new().open(link)?;
        print_configuration(&stream);
        let started = monotonic_nanos();
        let written = write_tone(&stream, 440.0, seconds)?;
        let elapsed_ms = (monotonic_nanos() - started) / NANOS_PER_MILLISECOND;
        println!(
            "Frames written: {}, frames read: {}, xruns: {}, elapsed: {} ms",
            written,
            stream.frames_read(),
            stream.xrun_count(),
            elapsed_ms
        );
        stream.close()?;
    }

    println!("Open streams after close: {}", service.stream_count());
    Ok(())
}

fn print_configuration(stream: &ClientStream) {
    let config = stream.configuration();
    println!("Stream {}:", stream.handle());
    println!("  Device: {} ({})", config.device_id, config.direction);
    println!("  Format: {} Hz, {} ch, {}", config.sample_rate, config.samples_per_frame, config.format);
    println!("  Sharing: {:?}", config.sharing_mode);
    println!("  Burst: {} frames", config.frames_per_burst);
    println!("  Capacity: {} frames", config.buffer_capacity);
}

fn show_info() -> Result<()> {
    println!("audiopipe {}", audiopipe::VERSION);
    println!("Platform: {}", std::env::consts::OS);
    println!("Architecture: {}", std::env::consts::ARCH);
    println!("Features:");
    println!("  - memfd regions: {}", cfg!(target_os = "linux"));
    println!("  - socket transport with descriptor passing");
    println!("  - simulated devices");
    Ok(())
}
