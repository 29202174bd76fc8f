use env_logger::Env;
use micc::{Diagnostic, Severity};
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process;
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "micc", about = "Compile a small C-like language to MIPS assembly.")]
struct CliArgs {
  /// Source file; standard input when omitted
  #[structopt(parse(from_os_str))]
  input: Option<PathBuf>,

  /// Where to write the assembly
  #[structopt(parse(from_os_str), long = "output", short = "o", default_value = "out.asm")]
  output: PathBuf,

  /// Write the token stream to this path
  #[structopt(parse(from_os_str), long = "tokens")]
  tokens: Option<PathBuf>,

  /// Trace the scanner
  #[structopt(long = "trace-scan")]
  trace_scan: bool,

  /// Trace the parser
  #[structopt(long = "trace-parse")]
  trace_parse: bool,
}

fn main() {
  let args = CliArgs::from_args();

  let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("warn"));
  if args.trace_scan {
    builder.filter_module("micc::tokenizer", log::LevelFilter::Trace);
  }
  if args.trace_parse {
    builder.filter_module("micc::parser", log::LevelFilter::Trace);
  }
  builder.init();

  process::exit(run(&args));
}

fn run(args: &CliArgs) -> i32 {
  let (source, filename) = match read_source(args) {
    Ok(input) => input,
    Err(error) => {
      eprintln!("{error}");
      return 1;
    }
  };

  let tokens = match micc::tokenizer::tokenize(&source, &filename) {
    Ok(tokens) => tokens,
    Err(error) => {
      report(&Diagnostic::error(&error));
      return 1;
    }
  };

  if let Some(path) = &args.tokens {
    if let Err(error) = write_tokens(path, &tokens) {
      eprintln!("unable to write \"{}\": {error}", path.display());
      return 1;
    }
  }

  let program = match micc::parser::parse(tokens) {
    Ok(program) => program,
    Err(error) => {
      report(&Diagnostic::error(&error));
      return 1;
    }
  };

  let mut error_count = 0usize;
  let asm = program.compile(|diagnostic| {
    if diagnostic.severity == Severity::Error {
      error_count += 1;
    }
    report(diagnostic);
  });
  if error_count > 0 {
    return 1;
  }

  if let Err(error) = fs::write(&args.output, asm) {
    eprintln!("unable to write \"{}\": {error}", args.output.display());
    return 1;
  }
  0
}

fn read_source(args: &CliArgs) -> io::Result<(String, String)> {
  match &args.input {
    Some(path) => Ok((fs::read_to_string(path)?, path.display().to_string())),
    None => {
      let mut source = String::new();
      io::stdin().read_to_string(&mut source)?;
      Ok((source, "stdin".to_string()))
    }
  }
}

fn report(diagnostic: &Diagnostic) {
  eprintln!("{diagnostic}");
}

fn write_tokens(path: &PathBuf, tokens: &[micc::tokenizer::Token]) -> io::Result<()> {
  let mut file = fs::File::create(path)?;
  for token in tokens {
    writeln!(
      file,
      "{}: {:?} {}",
      token.location, token.kind, token.text
    )?;
  }
  Ok(())
}
