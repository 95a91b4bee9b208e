// Command-line harness for vcpatch.
//
// Two subcommands: `decode` applies a delta to a source file, `header`
// prints the file and window headers of a delta without decoding it.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::PathBuf;
use std::process;

use bitflags::Flags;
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::compress::decoder::{self, DecodeOptions, DeltaSummary, PatchReport};
use crate::compress::secondary::secondary_name;
use crate::vcdiff::header::{HeaderIndicator, MAX_WINDOW_SIZE};
use crate::vcdiff::varint;

const BUF_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Byte size parsing (supports K, M, G suffixes)
// ---------------------------------------------------------------------------

fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1024u64),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1u64),
    };
    let num: u64 = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: '{s}'"))
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// VCDIFF (RFC 3284) patch decoder with xdelta3 extensions.
#[derive(Parser, Debug)]
#[command(
    name = "vcpatch",
    version,
    about = "Apply VCDIFF / xdelta3 patches",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (errors only).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output summaries as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Apply a delta to a source file.
    Decode(DecodeArgs),
    /// Print the file header and every window header of a delta.
    Header(PrintArgs),
}

#[derive(Args, Debug)]
struct DecodeArgs {
    /// Source file the delta was made against.
    #[arg(long, short = 's', value_hint = ValueHint::FilePath)]
    source: Option<PathBuf>,

    /// Input delta file (default: stdin).
    #[arg(long, value_hint = ValueHint::FilePath, conflicts_with = "input_pos")]
    input: Option<PathBuf>,

    /// Output file (default: stdout).
    #[arg(long, value_hint = ValueHint::FilePath, conflicts_with = "output_pos")]
    output: Option<PathBuf>,

    /// Write output to stdout.
    #[arg(short = 'c', long)]
    stdout: bool,

    /// Disable Adler-32 verification.
    #[arg(long = "no-checksum", conflicts_with = "strict_checksum")]
    no_checksum: bool,

    /// Fail on the first Adler-32 mismatch instead of warning.
    #[arg(long = "strict-checksum")]
    strict_checksum: bool,

    /// Largest accepted target window (supports K/M/G suffix).
    #[arg(long = "max-window-size", value_parser = parse_byte_size, default_value_t = MAX_WINDOW_SIZE)]
    max_window_size: u64,

    /// Check only (decode without writing output).
    #[arg(long = "check-only")]
    no_output: bool,

    /// Input delta file (positional form).
    #[arg(value_hint = ValueHint::FilePath)]
    input_pos: Option<PathBuf>,

    /// Output file (positional form).
    #[arg(value_hint = ValueHint::FilePath)]
    output_pos: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PrintArgs {
    /// VCDIFF input file.
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,
}

// ---------------------------------------------------------------------------
// Resolved command + options (flattened from Cli)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Decode,
    PrintHdr,
}

#[derive(Debug)]
struct Options {
    command: Command,
    use_stdout: bool,
    force: bool,
    quiet: bool,
    verbose: u8,
    no_checksum: bool,
    strict_checksum: bool,
    max_window_size: u64,
    no_output: bool,
    source_file: Option<PathBuf>,
    input_file: Option<PathBuf>,
    output_file: Option<PathBuf>,
    json_output: bool,
}

fn resolve_options(cli: Cli) -> Options {
    let quiet = cli.quiet;
    let verbose = cli.verbose.min(2);
    let force = cli.force;
    let json_output = cli.json_output;

    match cli.command {
        Cmd::Decode(args) => Options {
            command: Command::Decode,
            use_stdout: args.stdout,
            force,
            quiet,
            verbose,
            no_checksum: args.no_checksum,
            strict_checksum: args.strict_checksum,
            max_window_size: args.max_window_size,
            no_output: args.no_output,
            source_file: args.source,
            input_file: args.input.or(args.input_pos),
            output_file: args.output.or(args.output_pos),
            json_output,
        },
        Cmd::Header(args) => Options {
            command: Command::PrintHdr,
            use_stdout: false,
            force,
            quiet,
            verbose,
            no_checksum: false,
            strict_checksum: false,
            max_window_size: MAX_WINDOW_SIZE,
            no_output: false,
            source_file: None,
            input_file: Some(args.input),
            output_file: None,
            json_output,
        },
    }
}

fn decode_options(opts: &Options) -> DecodeOptions {
    DecodeOptions {
        verify_checksum: !opts.no_checksum,
        strict_checksum: opts.strict_checksum,
        max_window_size: opts.max_window_size,
    }
}

#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_args(args: &[String]) {
    let argv: Vec<String> = std::iter::once("vcpatch".to_string())
        .chain(args.iter().cloned())
        .collect();
    if let Ok(cli) = Cli::try_parse_from(argv) {
        let opts = resolve_options(cli);
        let _ = decode_options(&opts);
    }
}

// ---------------------------------------------------------------------------
// Decode command
// ---------------------------------------------------------------------------

fn cmd_decode(opts: &Options) -> i32 {
    // Source COPYs seek freely, so the source is held in memory.
    let source = match &opts.source_file {
        Some(path) => match fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                eprintln!("vcpatch: source file: {}: {e}", path.display());
                return 1;
            }
        },
        None => Vec::new(),
    };

    let delta_reader: Box<dyn Read> = match &opts.input_file {
        Some(path) => match File::open(path) {
            Ok(f) => Box::new(BufReader::with_capacity(BUF_SIZE, f)),
            Err(e) => {
                eprintln!("vcpatch: input file: {}: {e}", path.display());
                return 1;
            }
        },
        None => Box::new(BufReader::new(io::stdin())),
    };

    let created_file = match (&opts.output_file, opts.use_stdout || opts.no_output) {
        (Some(path), false) => Some(path.clone()),
        _ => None,
    };

    let mut output_writer: Box<dyn Write> = if opts.no_output {
        Box::new(io::sink())
    } else if let Some(path) = &created_file {
        if path.exists() && !opts.force {
            eprintln!(
                "vcpatch: output file exists, use -f to overwrite: {}",
                path.display()
            );
            return 1;
        }
        match File::create(path) {
            Ok(f) => Box::new(BufWriter::with_capacity(BUF_SIZE, f)),
            Err(e) => {
                eprintln!("vcpatch: output file: {}: {e}", path.display());
                return 1;
            }
        }
    } else {
        Box::new(BufWriter::with_capacity(BUF_SIZE, io::stdout().lock()))
    };

    let result = decoder::apply_diff_with_options(
        &mut Cursor::new(&source[..]),
        delta_reader,
        &mut output_writer,
        &decode_options(opts),
    );
    drop(output_writer);

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            eprintln!("vcpatch: decode error: {e}");
            // A partial target is never a valid file.
            if let Some(path) = &created_file
                && let Err(rm) = fs::remove_file(path)
            {
                log::warn!("could not remove partial output {}: {rm}", path.display());
            }
            return 1;
        }
    };

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "vcpatch: decoder: output size: {}, windows: {}",
            report.bytes_written, report.windows
        );
        if let Some(app) = &report.app_header {
            eprintln!("vcpatch: application header: {}", String::from_utf8_lossy(app));
        }
    }
    if !report.is_clean() && !opts.quiet {
        eprintln!(
            "vcpatch: warning: {} window(s) failed Adler-32 verification",
            report.checksum_warnings.len()
        );
    }
    if opts.json_output {
        eprintln!("{:#}", report_json(&report));
    }

    0
}

fn report_json(report: &PatchReport) -> serde_json::Value {
    let warnings: Vec<_> = report
        .checksum_warnings
        .iter()
        .map(|w| {
            serde_json::json!({
                "window": w.window,
                "expected": format!("{:08X}", w.expected),
                "actual": format!("{:08X}", w.actual),
            })
        })
        .collect();
    serde_json::json!({
        "command": "decode",
        "output_size": report.bytes_written,
        "windows": report.windows,
        "app_header": report.app_header.as_deref().map(String::from_utf8_lossy),
        "checksum_warnings": warnings,
    })
}

// ---------------------------------------------------------------------------
// Header command
// ---------------------------------------------------------------------------

/// Space-separated `VCD_*` names of the set bits, or `none`.
fn flag_names<F: Flags>(flags: F) -> String {
    let names: Vec<String> = flags
        .iter_names()
        .map(|(name, _)| format!("VCD_{name}"))
        .collect();
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(" ")
    }
}

fn header_size(summary: &DeltaSummary) -> u64 {
    let hdr = &summary.header;
    let mut size = 5u64;
    if hdr.hdr_ind.contains(HeaderIndicator::SECONDARY) {
        size += 1;
    }
    if let Some(app) = &hdr.app_header {
        size += varint::sizeof_u64(app.len() as u64) as u64 + app.len() as u64;
    }
    size
}

fn cmd_print(opts: &Options) -> i32 {
    let Some(input_file) = &opts.input_file else {
        eprintln!("vcpatch: header requires an input file");
        return 1;
    };

    let file = match File::open(input_file) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("vcpatch: {}: {e}", input_file.display());
            return 1;
        }
    };

    let summary = match decoder::inspect(BufReader::with_capacity(BUF_SIZE, file)) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("vcpatch: {}: {e}", input_file.display());
            return 1;
        }
    };

    if opts.json_output {
        eprintln!("{:#}", summary_json(&summary));
        return 0;
    }

    let hdr = &summary.header;
    println!("VCDIFF version:               0");
    println!("VCDIFF header size:           {}", header_size(&summary));
    println!("VCDIFF header indicator:      {}", flag_names(hdr.hdr_ind));
    match hdr.secondary_id {
        Some(id) => println!(
            "VCDIFF secondary compressor:  {} (id={id})",
            secondary_name(id)
        ),
        None => println!("VCDIFF secondary compressor:  none"),
    }
    if let Some(app) = &hdr.app_header
        && !app.is_empty()
    {
        println!(
            "VCDIFF application header:    {}",
            String::from_utf8_lossy(app)
        );
    }

    let mut target_offset = 0u64;
    for (num, wh) in summary.windows.iter().enumerate() {
        println!();
        println!("VCDIFF window number:         {num}");
        println!("VCDIFF window indicator:      {}", flag_names(wh.win_ind));
        if let Some(cksum) = wh.adler32 {
            println!("VCDIFF adler32 checksum:      {cksum:08X}");
        }
        if !wh.del_ind.is_empty() {
            println!("VCDIFF delta indicator:       {}", flag_names(wh.del_ind));
        }
        if wh.has_source() {
            println!("VCDIFF copy window length:    {}", wh.source_segment_len);
            println!("VCDIFF copy window offset:    {}", wh.source_segment_pos);
        }
        println!("VCDIFF delta encoding length: {}", wh.enc_len);
        println!("VCDIFF target window length:  {}", wh.target_window_len);
        println!("VCDIFF target window offset:  {target_offset}");
        println!("VCDIFF data section length:   {}", wh.data_len);
        println!("VCDIFF inst section length:   {}", wh.inst_len);
        println!("VCDIFF addr section length:   {}", wh.addr_len);
        target_offset = target_offset.saturating_add(wh.target_window_len);
    }

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "vcpatch: {} windows, target size {}",
            summary.windows.len(),
            summary.target_len()
        );
    }

    0
}

fn summary_json(summary: &DeltaSummary) -> serde_json::Value {
    let hdr = &summary.header;
    let windows: Vec<_> = summary
        .windows
        .iter()
        .map(|wh| {
            serde_json::json!({
                "indicator": flag_names(wh.win_ind),
                "delta_indicator": flag_names(wh.del_ind),
                "source_segment_len": wh.source_segment_len,
                "source_segment_pos": wh.source_segment_pos,
                "target_len": wh.target_window_len,
                "data_len": wh.data_len,
                "inst_len": wh.inst_len,
                "addr_len": wh.addr_len,
                "adler32": wh.adler32.map(|c| format!("{c:08X}")),
            })
        })
        .collect();
    serde_json::json!({
        "command": "header",
        "header_size": header_size(summary),
        "indicator": flag_names(hdr.hdr_ind),
        "secondary": hdr.secondary_id.map(secondary_name),
        "app_header": hdr.app_header.as_deref().map(String::from_utf8_lossy),
        "target_size": summary.target_len(),
        "windows": windows,
    })
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run() -> ! {
    let cli = Cli::parse();
    let mut opts = resolve_options(cli);

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    logger.format_timestamp(None).format_target(false);
    if opts.quiet {
        logger.filter_level(log::LevelFilter::Error);
    } else if opts.verbose == 1 {
        logger.filter_level(log::LevelFilter::Info);
    } else if opts.verbose > 1 {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    // Warn if -c overrides output filename.
    if opts.use_stdout
        && let Some(path) = opts.output_file.take()
        && !opts.quiet
    {
        eprintln!(
            "vcpatch: warning: -c option overrides output filename: {}",
            path.display()
        );
    }

    let exit_code = match opts.command {
        Command::Decode => cmd_decode(&opts),
        Command::PrintHdr => cmd_print(&opts),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
