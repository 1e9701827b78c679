use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use dynadump_core::config::ProbeConfig;
use dynadump_core::image::{inspect_image, loaded_images, resolve_image, DyldCapabilities};
use dynadump_core::loader::Dlopen;
use dynadump_core::{add_stepover_address, Address, FaultRecord, ProbeError, Result as ProbeResult, SafeLoader};
use dynadump_utils::{info, init_logging_with_config, LogFormat, LogLevel, LoggingConfig};

/// Probe whether a dynamic library loads cleanly, stepping over known-benign faults.
#[derive(Parser, Debug)]
#[command(name = "dynadump")]
#[command(version)]
#[command(about = "Probe whether a dynamic library loads cleanly and inspect loaded images on Darwin", long_about = None)]
struct Cli
{
    /// Log level (error, warn, info, debug, trace). Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    /// Log format (pretty or json). Overrides DYNADUMP_LOG_FORMAT.
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Load an image under the exception monitor
    Probe
    {
        /// Image path or bare name (e.g. Foundation, libobjc)
        image: String,
        /// Address that may fault harmlessly during the load (hex or decimal, repeatable)
        #[arg(long = "stepover", value_name = "ADDR")]
        stepovers: Vec<Address>,
        /// Single-step once after each stepover to confirm forward progress
        #[arg(long, default_value_t = false)]
        verify_progress: bool,
        /// Log every exception message the monitor receives
        #[arg(short, long, default_value_t = false)]
        verbose: bool,
    },
    /// List the images loaded into this process
    Images,
    /// Show the dyld shared cache this process maps
    Cache
    {
        /// Also list the install name of every image in the cache
        #[arg(long, default_value_t = false)]
        list: bool,
    },
    /// Show which path a bare image name resolves to
    Resolve
    {
        /// Image path or bare name
        image: String,
    },
    /// Summarize a Mach-O file on disk
    Inspect
    {
        /// Path to a Mach-O image or universal binary
        path: PathBuf,
    },
}

fn main()
{
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env();
    logging.level = cli.log_level;
    if let Some(format) = cli.log_format {
        logging.format = format;
    }
    let _guard = match init_logging_with_config(&logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli.command) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run_command(command: Commands) -> ProbeResult<()>
{
    match command {
        Commands::Probe {
            image,
            stepovers,
            verify_progress,
            verbose,
        } => {
            let path = resolve_image(&image)?;
            for address in stepovers {
                add_stepover_address(address);
            }

            let config = ProbeConfig::default()
                .with_verbose(verbose)
                .with_verify_progress(verify_progress);
            let mut loader = SafeLoader::new(Dlopen::default()).with_config(config);
            info!("Probing {}", path);

            let caps = DyldCapabilities::get();
            match loader.safe_load(&path) {
                Ok(loaded) => {
                    println!("Loaded {} ({:?})", path, loaded.handle);
                    for fault in &loaded.stepped_over {
                        println!("  Stepped over: {}", describe_fault(fault, caps));
                    }
                    Ok(())
                }
                Err(ProbeError::LoadFailed { reason, fault }) => {
                    if let Some(fault) = &fault {
                        println!("  Last stepped-over fault: {}", describe_fault(fault, caps));
                    }
                    Err(ProbeError::LoadFailed { reason, fault })
                }
                Err(e) => Err(e),
            }
        }
        Commands::Images => {
            let images = loaded_images()?;
            println!("{} image(s) loaded", images.len());
            for image in images {
                println!("  [{:>4}] {} slide {:#x} {}", image.index, image.header, image.slide, image.path);
            }
            Ok(())
        }
        Commands::Cache { list } => {
            let caps = DyldCapabilities::get();
            let Some(cache) = caps.shared_cache_path() else {
                println!("No dyld shared cache mapped");
                return Ok(());
            };
            println!("{}", cache);
            if list {
                match caps.shared_cache_install_names(&cache) {
                    Some(names) => {
                        println!("{} image(s) in cache", names.len());
                        for name in names {
                            println!("  {}", name);
                        }
                    }
                    None => return Err(ProbeError::Unsupported("dyld cannot enumerate the shared cache")),
                }
            }
            Ok(())
        }
        Commands::Resolve { image } => {
            let path = resolve_image(&image)?;
            let on_disk = std::path::Path::new(&path).exists();
            println!("{} -> {} ({})", image, path, location(&path, on_disk, DyldCapabilities::get()));
            Ok(())
        }
        Commands::Inspect { path } => {
            let summary = inspect_image(&path)?;
            print!("{}", summary);
            Ok(())
        }
    }
}

/// A stepped-over fault and the loaded image its pc falls in.
fn describe_fault(fault: &FaultRecord, caps: &DyldCapabilities) -> String
{
    match caps.image_path_containing(fault.pc) {
        Some(image) => format!("{} in {}", fault, image),
        None => format!("{} in unknown image", fault),
    }
}

/// Where a resolved image path lives.
fn location(path: &str, on_disk: bool, caps: &DyldCapabilities) -> String
{
    if on_disk {
        "on disk".to_string()
    } else if caps.shared_cache_contains(path) {
        match caps.shared_cache_path() {
            Some(cache) => format!("in dyld shared cache {}", cache),
            None => "in dyld shared cache".to_string(),
        }
    } else {
        "not found".to_string()
    }
}

#[cfg(test)]
mod tests
{
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid()
    {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_probe_collects_stepovers()
    {
        let cli = Cli::try_parse_from([
            "dynadump",
            "probe",
            "Foundation",
            "--stepover",
            "0x1000",
            "--stepover",
            "8192",
            "--verify-progress",
        ])
        .unwrap();
        match cli.command {
            Commands::Probe {
                image,
                stepovers,
                verify_progress,
                verbose,
            } => {
                assert_eq!(image, "Foundation");
                assert_eq!(stepovers, vec![Address::new(0x1000), Address::new(0x2000)]);
                assert!(verify_progress);
                assert!(!verbose);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_logging_flags()
    {
        let cli = Cli::try_parse_from(["dynadump", "images", "--log-level", "debug", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert_eq!(cli.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn test_cache_list_flag()
    {
        let cli = Cli::try_parse_from(["dynadump", "cache", "--list"]).unwrap();
        assert!(matches!(cli.command, Commands::Cache { list: true }));
        let cli = Cli::try_parse_from(["dynadump", "cache"]).unwrap();
        assert!(matches!(cli.command, Commands::Cache { list: false }));
    }

    #[test]
    fn test_fault_without_dyld_support_names_unknown_image()
    {
        let fault = FaultRecord {
            class: dynadump_core::FaultClass::BadAccess,
            address: Address::new(0x1000),
            pc: Address::new(0x1_0000_4000),
        };
        let line = describe_fault(&fault, &DyldCapabilities::none());
        assert!(line.starts_with("EXC_BAD_ACCESS at 0x0000000000001000"));
        assert!(line.ends_with("in unknown image"));
    }

    #[test]
    fn test_location_without_dyld_support()
    {
        let caps = DyldCapabilities::none();
        assert_eq!(location("/usr/lib/libobjc.A.dylib", true, &caps), "on disk");
        assert_eq!(location("/usr/lib/libobjc.A.dylib", false, &caps), "not found");
    }

    #[test]
    fn test_package_carries_no_repository_link()
    {
        assert!(env!("CARGO_PKG_REPOSITORY").is_empty());
        assert!(env!("CARGO_PKG_HOMEPAGE").is_empty());
    }

    #[test]
    fn test_bad_stepover_address_is_rejected()
    {
        assert!(Cli::try_parse_from(["dynadump", "probe", "libobjc", "--stepover", "0xnope"]).is_err());
    }
}
