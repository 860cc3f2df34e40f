mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use mpegfs::fs::{sanitize_title, Operations, PassthroughFs, RemoteFs};
use mpegfs::fuse;
use mpegfs_av::{SearchProvider, ToolRegistry, YtDlpSearch};
use mpegfs_core::config::Config;

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = Config::load_or_default(path).context("Failed to load configuration")?;
    for warning in config.validate() {
        tracing::warn!("Config: {}", warning);
    }
    Ok(config)
}

fn mount(
    dirs: Vec<PathBuf>,
    config_path: Option<&Path>,
    foreground: bool,
    create_on_navigation: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if create_on_navigation {
        config.remote.create_on_navigation = true;
    }

    let (source, target) =
        cli::split_dirs(dirs).context("Expected [SOURCE_DIR] TARGET_DIR")?;
    if !target.is_dir() {
        anyhow::bail!("Mount point does not exist: {:?}", target);
    }

    let tools = ToolRegistry::discover(&config.tools);
    let ops: Arc<dyn Operations> = match source {
        Some(source) => {
            tracing::info!("Mirroring {:?} with transcoding", source);
            Arc::new(
                PassthroughFs::new(&source, &config, tools)
                    .with_context(|| format!("Cannot mirror {:?}", source))?,
            )
        }
        None => {
            tracing::info!("Mounting search tree");
            let search = YtDlpSearch::new(&tools, &config.remote)
                .context("Search mode needs yt-dlp")?;
            Arc::new(RemoteFs::new(&config, tools, Arc::new(search)))
        }
    };

    // Fork before any runtime threads exist.
    if !foreground {
        nix::unistd::daemon(true, false).context("Failed to daemonize")?;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let result = fuse::mount(ops, &target, &config.mount, runtime.handle().clone())
        .with_context(|| format!("Failed to mount at {:?}", target));

    tracing::info!("Unmounted {:?}", target);
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose/debug flags
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose || cli.command.debug() {
            "mpegfs=debug,mpegfs_av=debug,mpegfs_core=debug,fuser=debug".to_string()
        } else {
            "mpegfs=info,mpegfs_av=info,mpegfs_core=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let foreground = cli.command.foreground();
    match cli.command {
        Commands::Mount {
            dirs,
            create_on_navigation,
            ..
        } => mount(dirs, cli.config.as_deref(), foreground, create_on_navigation),
        Commands::Search {
            phrase,
            limit,
            json,
        } => search(&phrase.join(" "), limit, json, cli.config.as_deref()),
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mpegfs {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn search(phrase: &str, limit: Option<usize>, json: bool, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let tools = ToolRegistry::discover(&config.tools);
    let provider = YtDlpSearch::new(&tools, &config.remote)?;
    let limit = limit.unwrap_or(config.remote.search_results);

    let runtime = tokio::runtime::Runtime::new()?;
    let results = runtime
        .block_on(provider.search(phrase, limit))
        .with_context(|| format!("Search for {:?} failed", phrase))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results for {:?}", phrase);
    }
    for result in &results {
        println!("{}", sanitize_title(&result.title));
        println!("  Title: {}", result.title);
        println!("  URL:   {}", result.url);
    }

    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    println!("Checking external tools...\n");

    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable all features.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = Config::load(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using default lookup");
            Config::load_or_default(None)?
        }
    };

    println!(
        "  Mount: fsname={} allow_other={} auto_unmount={}",
        config.mount.fsname, config.mount.allow_other, config.mount.auto_unmount
    );
    println!(
        "  Transcode: {} {} @ {}, width {}",
        config.transcode.format,
        config.transcode.video_codec,
        config.transcode.video_bitrate,
        config.transcode.width
    );
    println!(
        "  Passthrough: {} extensions, read timeout {}ms",
        config.passthrough.extensions.len(),
        config.passthrough.read_timeout_ms
    );
    println!(
        "  Remote: {} results, format {:?}, read timeout {}ms, create on navigation: {}",
        config.remote.search_results,
        config.remote.format,
        config.remote.read_timeout_ms,
        config.remote.create_on_navigation
    );

    let warnings = config.validate();
    for warning in &warnings {
        println!("  ! {}", warning);
    }

    Ok(())
}
