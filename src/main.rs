use gumdrop::Options;

use gosling::report;
use gosling::util;
use gosling::{GoslingConfiguration, GoslingError, LoadEngine};

// Width of the widest bar in the profile preview.
const PREVIEW_WIDTH: usize = 50;

#[tokio::main]
async fn main() {
    let configuration = GoslingConfiguration::parse_args_default_or_exit();
    if let Err(e) = run(configuration).await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

async fn run(configuration: GoslingConfiguration) -> Result<(), GoslingError> {
    // If version flag is set, display package name and version and exit.
    if configuration.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    configuration.initialize_logger()?;
    configuration.validate()?;
    let profile = configuration.profile_config()?;

    // Display the load curve, then exit.
    if configuration.preview {
        println!(
            " === {} PROFILE ({} users, {} seconds) ===",
            profile.profile.to_string().to_uppercase(),
            profile.max_users,
            profile.duration
        );
        for point in LoadEngine::preview_profile(&profile) {
            let width = point.users * PREVIEW_WIDTH / profile.max_users;
            println!(" {:>6}s | {:>6} | {}", point.tick, point.users, "#".repeat(width.max(1)));
        }
        return Ok(());
    }

    let engine = LoadEngine::with_reqwest(&configuration)?;
    let handle = engine.start(configuration.request_spec()?, profile)?;

    // Catch ctrl-c to allow clean shutdown to display metrics.
    util::setup_ctrlc_handler(&handle);

    let samples = engine.subscribe(&handle);
    while let Ok(sample) = samples.recv_async().await {
        println!(" {}", sample);
    }

    let summary = engine.wait(&handle).await?;
    println!("\n{}", summary);

    if !configuration.report_file.is_empty() {
        report::write_report(&configuration.report_file, &summary, &engine.samples(&handle)).await?;
    }

    Ok(())
}
