use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context as _, Result};
use chrono::{Local, NaiveDateTime};
use clap::{ArgEnum, Args, Parser};
use clio::{Input, Output};

use crate::config::Config;
use crate::{compile, parse, print_error, Options, TIMESTAMP_FORMAT};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ArgEnum)]
enum Format {
    Ast,
    Sql,
}

#[derive(Parser)]
#[clap(name = env!("CARGO_PKG_NAME"), about, version)]
pub enum Cli {
    Compile(CompileCommand),
    Batch(BatchCommand),
}

#[derive(Args)]
/// Compile a rule file into a SQL query.
pub struct CompileCommand {
    #[clap(default_value="-", parse(try_from_os_str = Input::try_from))]
    input: Input,

    #[clap(short, long, default_value = "-", parse(try_from_os_str = Output::try_from))]
    output: Output,

    /// Baseline moment substituted for `t0`, as `YYYY-MM-DD HH:MM:SS`
    /// (defaults to now).
    #[clap(short, long)]
    timestamp: Option<String>,

    /// Wrap the query in the outermost suspect-client aggregation.
    #[clap(short, long)]
    group_by: bool,

    /// The table holding the DNS replies.
    #[clap(long, default_value = "hplDNSReplies")]
    table: String,

    #[clap(short, long, arg_enum, default_value = "sql")]
    format: Format,
}

#[derive(Args)]
/// Compile every configured rule over the configured day/hour matrix and
/// report compile-time statistics.
pub struct BatchCommand {
    /// Configuration holding the `[batch]` matrix.
    #[clap(short, long, default_value = "config.toml")]
    config: String,

    /// Directory holding the `<name>.linn` rule files.
    #[clap(long, default_value = "rules")]
    rules_dir: PathBuf,

    /// Directory the compiled queries are written to.
    #[clap(long, default_value = "results")]
    out_dir: PathBuf,
}

fn is_stdin(input: &Input) -> bool {
    input.path() == "-"
}

impl Cli {
    pub fn execute(&mut self) -> Result<()> {
        match self {
            Cli::Compile(command) => command.execute(),
            Cli::Batch(command) => command.execute(),
        }
    }
}

impl CompileCommand {
    fn execute(&mut self) -> Result<()> {
        let mut source = String::new();

        // Don't wait without a prompt when running `linnea compile` — it's
        // confusing whether it's waiting for input or not. This offers the
        // prompt.
        if is_stdin(&self.input) && atty::is(atty::Stream::Stdin) {
            println!("Enter a rule, then ctrl-d:");
            println!();
        }
        self.input.read_to_string(&mut source)?;
        let source_id = self.input.path().to_string_lossy().to_string();

        match self.format {
            Format::Ast => match parse(&source) {
                Ok(ast) => self.output.write_all(&serde_yaml::to_vec(&ast)?)?,
                Err(error) => {
                    print_error(&error, &source_id, &source);
                    bail!("could not parse {source_id}");
                }
            },
            Format::Sql => {
                let mut options = Options::new(timestamp_of_arg(self.timestamp.as_deref())?);
                options.with_group_by = self.group_by;
                options.table_name = self.table.clone();

                match compile(&source, &options) {
                    Ok(sql) => {
                        self.output.write_all(sql.as_bytes())?;
                        self.output.write_all(b"\n")?;
                    }
                    Err(error) => {
                        print_error(&error, &source_id, &source);
                        bail!("could not compile {source_id}");
                    }
                }
            }
        };

        Ok(())
    }
}

impl BatchCommand {
    fn execute(&mut self) -> Result<()> {
        let config = Config::from_file(&self.config)?;
        std::fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("cannot create {}", self.out_dir.display()))?;

        let mut total_times = Vec::new();
        for name in &config.batch.dgas {
            let path = self.rules_dir.join(format!("{name}.linn"));
            let source = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read rule {}", path.display()))?;
            println!("{:-<79}", "");
            println!("Compiling {name} (file {})", path.display());

            let mut times = Vec::new();
            for day in &config.batch.days {
                for hour in &config.batch.hours {
                    let timestamp =
                        NaiveDateTime::parse_from_str(&format!("{day} {hour}"), TIMESTAMP_FORMAT)
                            .with_context(|| format!("invalid batch moment {day} {hour}"))?;
                    let mut options = Options::new(timestamp);
                    options.with_group_by = true;

                    let started = Instant::now();
                    let sql = match compile(&source, &options) {
                        Ok(sql) => sql,
                        Err(error) => {
                            print_error(&error, &path.display().to_string(), &source);
                            bail!("could not compile {}", path.display());
                        }
                    };
                    times.push(started.elapsed().as_secs_f64());

                    let out = self
                        .out_dir
                        .join(format!("{name}-{day}-{}.sql", hour.replace(':', "-")));
                    std::fs::write(&out, sql)
                        .with_context(|| format!("cannot write {}", out.display()))?;
                }
            }
            print_statistics(&format!("{name} compile time"), &times);
            total_times.extend(times);
        }
        print_statistics("total compile time", &total_times);
        Ok(())
    }
}

fn timestamp_of_arg(arg: Option<&str>) -> Result<NaiveDateTime> {
    match arg {
        Some(value) => NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
            .with_context(|| format!("invalid timestamp {value:?}, expected {TIMESTAMP_FORMAT}")),
        None => Ok(Local::now().naive_local()),
    }
}

fn print_statistics(label: &str, times: &[f64]) {
    if times.is_empty() {
        return;
    }
    let max = times.iter().cloned().fold(f64::MIN, f64::max);
    let min = times.iter().cloned().fold(f64::MAX, f64::min);
    let mean = times.iter().sum::<f64>() / times.len() as f64;
    let variance = times.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / times.len() as f64;

    println!("{:*<40}", "");
    println!("{}", label.to_uppercase());
    println!("Max:\t{max:.6}s");
    println!("Min:\t{min:.6}s");
    println!("Mean:\t{mean:.6}s");
    println!("Std dev:\t{:.6}s", variance.sqrt());
}
