use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use fatrecover_core::device::{DeviceCategory, DeviceDescriptor, DeviceSectorSource, SectorSource};
use fatrecover_core::fs::{detect_filesystem, fat32};
use fatrecover_core::partition::{detect_scheme, list_partitions};
use fatrecover_core::{
	DirectoryOutput, DiscardOutput, RecoveryConfig, RecoveryEngine, RecoveryOutcome,
	RecoveryOutput, RecoveryReport, RecoveryStage,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "fatrecover", version, about = "Recover deleted files from FAT32 volumes")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
	/// Treat <drive> as a raw image of the given kind instead of a drive name
	#[arg(long, global = true, value_enum)]
	image: Option<ImageKind>,
	/// JSON file with recovery settings
	#[arg(long, global = true)]
	config: Option<PathBuf>,
	/// More log output (-v info, -vv debug, -vvv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	verbose: u8,
	/// Only log errors
	#[arg(short, long, global = true)]
	quiet: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ImageKind {
	/// Whole-disk image with a partition table
	Physical,
	/// Single-volume image starting at the boot sector
	Logical,
}

#[derive(Args, Debug)]
struct Filters {
	/// Only consider entries starting at this cluster
	#[arg(long)]
	cluster: Option<u32>,
	/// Only consider entries with this declared size
	#[arg(long)]
	size: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// List partitions and the file systems on them
	Partitions {
		/// Drive number (0, PhysicalDrive1), drive letter (E, E:) or image path
		drive: String,
	},
	/// Analyze deleted entries without writing anything
	Scan {
		drive: String,
		#[command(flatten)]
		filters: Filters,
		/// Save the analysis report as JSON
		#[arg(long)]
		report: Option<PathBuf>,
	},
	/// Recover deleted files into a directory
	Recover {
		drive: String,
		/// Output directory
		#[arg(long)]
		out: PathBuf,
		#[command(flatten)]
		filters: Filters,
		/// Save the recovery report as JSON
		#[arg(long)]
		report: Option<PathBuf>,
	},
}

fn main() -> Result<()> {
	let cli = Cli::parse();
	init_tracing(cli.verbose, cli.quiet);

	let mut config = load_config(cli.config.as_deref())?;
	match cli.command {
		Commands::Partitions { drive } => {
			let descriptor = resolve_drive(&drive, cli.image)?;
			show_partitions(&descriptor, config.device_bytes_per_sector)?;
		}
		Commands::Scan { drive, filters, report } => {
			let descriptor = resolve_drive(&drive, cli.image)?;
			apply_filters(&mut config, &filters);
			config.analyze_only = true;

			let result = run(&descriptor, config, &mut DiscardOutput)?;
			print_report(&result);
			if let Some(path) = report {
				save_report(&result, &path)?;
			}
		}
		Commands::Recover { drive, out, filters, report } => {
			let descriptor = resolve_drive(&drive, cli.image)?;
			apply_filters(&mut config, &filters);

			let mut output = DirectoryOutput::new(&out)
				.with_context(|| format!("cannot use output directory {}", out.display()))?;
			let result = run(&descriptor, config, &mut output)?;
			print_report(&result);
			println!("📁 Output: {}", output.root().display());
			if let Some(path) = report {
				save_report(&result, &path)?;
			}
		}
	}
	Ok(())
}

fn init_tracing(verbose: u8, quiet: bool) {
	let level = if quiet {
		Level::ERROR
	} else {
		match verbose {
			0 => Level::WARN,
			1 => Level::INFO,
			2 => Level::DEBUG,
			_ => Level::TRACE,
		}
	};

	tracing_subscriber::fmt()
		.with_max_level(level)
		.with_writer(std::io::stderr)
		.init();
}

fn load_config(path: Option<&Path>) -> Result<RecoveryConfig> {
	let Some(path) = path else {
		return Ok(RecoveryConfig::default());
	};
	let text = std::fs::read_to_string(path)
		.with_context(|| format!("cannot read config {}", path.display()))?;
	let config = serde_json::from_str(&text)
		.with_context(|| format!("invalid config {}", path.display()))?;
	tracing::info!("Loaded config from {}", path.display());
	Ok(config)
}

fn apply_filters(config: &mut RecoveryConfig, filters: &Filters) {
	if filters.cluster.is_some() {
		config.target_cluster = filters.cluster;
	}
	if filters.size.is_some() {
		config.target_size = filters.size;
	}
}

fn resolve_drive(drive: &str, image: Option<ImageKind>) -> Result<DeviceDescriptor> {
	let descriptor = match image {
		Some(ImageKind::Physical) => DeviceDescriptor::image(drive, DeviceCategory::Physical),
		Some(ImageKind::Logical) => DeviceDescriptor::image(drive, DeviceCategory::Logical),
		None => DeviceDescriptor::classify(drive)
			.with_context(|| format!("cannot interpret drive '{}'", drive))?,
	};
	tracing::info!("Using {} ({})", descriptor.path.display(), descriptor.category);
	Ok(descriptor)
}

fn show_partitions(descriptor: &DeviceDescriptor, bytes_per_sector: u32) -> Result<()> {
	let mut source = DeviceSectorSource::open(descriptor, bytes_per_sector)
		.with_context(|| format!("cannot open {}", descriptor.path.display()))?;

	if descriptor.category == DeviceCategory::Logical {
		let fs_type = detect_filesystem(&mut source, 0)?;
		println!("🔍 {}: logical volume, {}", descriptor.path.display(), fs_type);
		if let Ok(info) = fat32::get_filesystem_info(&mut source) {
			println!();
			println!("{}", info);
		}
		return Ok(());
	}

	let table = detect_scheme(&mut source)?;
	let partitions = list_partitions(&mut source, &table)
		.with_context(|| format!("no partition table on {}", descriptor.path.display()))?;

	println!("🔍 {}: {} disk, {} partition(s)", descriptor.path.display(), table.scheme, partitions.len());
	for (index, partition) in partitions.iter().enumerate() {
		source.set_start_lba(partition.start_lba());
		let detected = detect_filesystem(&mut source, 0)
			.map(|fs| fs.to_string())
			.unwrap_or_else(|e| format!("unreadable ({})", e));
		println!(
			"  #{:<2} LBA {:>10} - {:>10}  {:>8} MB  declared {:<7} found {}{}",
			index,
			partition.start_lba(),
			partition.end_lba(),
			partition.sector_count() * bytes_per_sector as u64 / (1024 * 1024),
			partition.declared_filesystem().to_string(),
			detected,
			partition.name().map(|n| format!("  \"{}\"", n)).unwrap_or_default()
		);
	}
	Ok(())
}

fn run(
	descriptor: &DeviceDescriptor,
	config: RecoveryConfig,
	output: &mut dyn RecoveryOutput,
) -> Result<RecoveryReport> {
	let mut source = DeviceSectorSource::open(descriptor, config.device_bytes_per_sector)
		.with_context(|| format!("cannot open {}", descriptor.path.display()))?;

	let pb = ProgressBar::new(0);
	pb.set_style(
		ProgressStyle::default_bar()
			.template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
			.progress_chars("#>-"),
	);

	let mut engine = RecoveryEngine::new(config);
	let bar = pb.clone();
	engine.set_progress_callback(move |progress| {
		bar.set_length(progress.candidates_found as u64);
		bar.set_position(progress.candidates_done as u64);
		bar.set_message(progress.current_operation);
		if progress.stage == RecoveryStage::Complete {
			bar.finish_with_message("done");
		}
	});

	let report = engine
		.recover_device(&mut source, descriptor, output)
		.with_context(|| format!("recovery failed on {}", descriptor.path.display()))?;
	pb.finish_and_clear();
	Ok(report)
}

fn print_report(report: &RecoveryReport) {
	println!("✅ Session {}", report.session_id);
	for partition in &report.partitions {
		match &partition.outcome {
			fatrecover_core::PartitionOutcome::Skipped(reason) => {
				println!("⏭️  Partition {} (LBA {}): skipped, {}", partition.index, partition.start_lba, reason);
			}
			fatrecover_core::PartitionOutcome::Recovered => {
				println!(
					"📂 Partition {} (LBA {}): {} directories, {} entries",
					partition.index, partition.start_lba, partition.directories_scanned, partition.entries_scanned
				);
			}
		}

		for status in &partition.statuses {
			let icon = match status.outcome {
				RecoveryOutcome::Success => "✅",
				RecoveryOutcome::Partial => "⚠️ ",
				RecoveryOutcome::Failed => "❌",
			};
			println!(
				"  {} #{:<5} {:<40} {:>10} / {:<10} bytes  cluster {:<8} frag {:>5.1}%  overwritten {:>5.1}%  score {:.2}",
				icon,
				status.ordinal,
				status.display_name,
				status.recovered_bytes,
				status.declared_size,
				status.start_cluster,
				status.fragmentation * 100.0,
				status.overwrite.overwrite_percentage * 100.0,
				status.recoverability
			);
		}
	}

	let totals = &report.totals;
	println!(
		"📈 {} candidates: {} recovered, {} partial, {} failed ({} bytes)",
		totals.candidates, totals.succeeded, totals.partial, totals.failed, totals.recovered_bytes
	);
}

fn save_report(report: &RecoveryReport, path: &Path) -> Result<()> {
	report
		.save_json(path)
		.with_context(|| format!("cannot write report {}", path.display()))?;
	println!("📝 Report: {}", path.display());
	Ok(())
}
