use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::Read;
use std::time::Duration;

use pyclinic::analyzer;
use pyclinic::config::Config;
use pyclinic::fragment::{Finding, Severity, SourceFragment};
use pyclinic::llm::{ollama::OllamaClient, openai_compat::OpenAiCompatClient, CorrectionProvider};
use pyclinic::sandbox::{process::ProcessSandbox, ResourceLimits, Sandbox};
use pyclinic::session::{submit_analysis, AnalysisOptions, SessionOutcome, SessionReport};

fn create_provider(cfg: &Config, model: &str) -> Box<dyn CorrectionProvider> {
    let deadline = Duration::from_secs(cfg.llm.request_timeout_secs);
    match cfg.llm.provider.as_str() {
        "openai_compat" => Box::new(OpenAiCompatClient::new(
            &cfg.llm.base_url,
            model,
            cfg.llm.api_key.clone(),
            deadline,
        )),
        _ => Box::new(OllamaClient::new(&cfg.llm.base_url, model, deadline)),
    }
}

#[derive(Parser)]
#[command(name = "pyclinic")]
#[command(about = "Review, repair, and safely execute Python snippets.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a snippet and loop with the model until it is fixed
    Review {
        /// Path to a Python file, or '-' for stdin
        file: Option<String>,
        /// Model to use
        #[arg(short, long)]
        model: Option<String>,
        /// Correction attempts before giving up
        #[arg(long)]
        max_iterations: Option<usize>,
        /// Report findings without asking the model for fixes
        #[arg(long)]
        no_fix: bool,
    },
    /// Static analysis only, nothing is executed
    Check {
        /// Path to a Python file, or '-' for stdin
        file: Option<String>,
    },
    /// Execute a snippet in the sandbox and show the structured result
    Run {
        /// Path to a Python file, or '-' for stdin
        file: Option<String>,
        /// Allow outbound network access
        #[arg(long)]
        allow_net: bool,
        /// Allow filesystem access outside the scratch area
        #[arg(long)]
        allow_fs: bool,
        /// Wall-clock limit in seconds
        #[arg(long)]
        wall_time: Option<u64>,
    },
    /// Show configuration
    Config,
}

fn read_source(file: Option<&str>) -> std::io::Result<String> {
    match file {
        Some(path) if path != "-" => std::fs::read_to_string(path),
        _ => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        }
    }
}

fn severity_label(severity: Severity) -> colored::ColoredString {
    match severity {
        Severity::Error => "error".red().bold(),
        Severity::Warning => "warning".yellow(),
        Severity::Info => "info".cyan(),
    }
}

fn print_findings(findings: &[Finding]) {
    for finding in findings {
        let location = match finding.location {
            Some((line, col)) => format!("{}:{}", line, col),
            None => "-".to_string(),
        };
        println!(
            "  {:>7}  {} [{}] {}",
            location.dimmed(),
            severity_label(finding.severity),
            finding.kind,
            finding.message
        );
    }
}

fn print_report(report: &SessionReport) {
    println!(
        "{} {} ({})",
        "session".bold(),
        report.session_id.dimmed(),
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    for event in &report.security_events {
        eprintln!("{} {}", "[security]".red().bold(), event);
    }

    for (idx, record) in report.iterations.iter().enumerate() {
        let label = if idx == 0 {
            "original".to_string()
        } else {
            format!("candidate {}", idx)
        };
        let status = match &record.execution {
            Some(exec) => format!(
                "{} ({:.2}s, peak {} KB)",
                exec.status,
                exec.wall_time.as_secs_f64(),
                exec.peak_memory / 1024
            ),
            None => "not executed".to_string(),
        };
        println!(
            "{} v{} - {} - {} finding(s)",
            label.bold(),
            record.fragment.version(),
            status,
            record.findings.len()
        );
        print_findings(&record.findings);
        if let Some(rationale) = &record.rationale {
            println!("  {}", rationale.dimmed());
        }
    }

    let best = report.best();
    println!();
    match report.outcome {
        SessionOutcome::Accepted => {
            println!("{} all findings resolved", "accepted:".green().bold());
            if report.best_index != 0 {
                println!("\n{}", "Corrected snippet:".bold());
                println!("{}", best.fragment.text());
            }
        }
        SessionOutcome::Exhausted => {
            println!(
                "{} {} finding(s) remain after {} attempt(s); best fragment is v{}",
                "exhausted:".yellow().bold(),
                best.findings.len(),
                report.attempts_used,
                best.fragment.version()
            );
            if report.best_index != 0 {
                println!("\n{}", "Best snippet so far:".bold());
                println!("{}", best.fragment.text());
            }
        }
        SessionOutcome::ReviewOnly => {
            println!(
                "{} {} finding(s)",
                "review:".bold(),
                best.findings.len()
            );
        }
    }
}

fn run_review(file: Option<String>, model: Option<String>, max_iterations: Option<usize>, no_fix: bool) {
    let cfg = Config::load();
    let source = match read_source(file.as_deref()) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{} {}", "Error:".red(), e);
            std::process::exit(1);
        }
    };

    let model = model.unwrap_or_else(|| cfg.llm.model.clone());
    let provider = create_provider(&cfg, &model);
    let sandbox = ProcessSandbox::new();
    let options = AnalysisOptions {
        max_iterations: max_iterations.unwrap_or(cfg.review.max_iterations),
        limits: cfg.limits.to_limits(),
        auto_correct: !no_fix && cfg.review.auto_correct,
    };

    match submit_analysis(&source, &options, provider.as_ref(), &sandbox) {
        Ok(report) => {
            print_report(&report);
            if !report.best().findings.is_empty() {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("{} {}", "Error:".red(), e);
            std::process::exit(1);
        }
    }
}

fn run_check(file: Option<String>) {
    let source = match read_source(file.as_deref()) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{} {}", "Error:".red(), e);
            std::process::exit(1);
        }
    };
    let fragment = SourceFragment::new(&source);
    let findings = analyzer::analyze(&fragment);
    let facts = analyzer::structure(&fragment);

    println!(
        "Functions: {} | Classes: {}",
        facts.functions.to_string().cyan(),
        facts.classes.to_string().cyan()
    );
    if findings.is_empty() {
        println!("{} no findings", "clean:".green().bold());
    } else {
        println!("{} finding(s):", findings.len());
        print_findings(&findings);
        std::process::exit(1);
    }
}

fn run_sandboxed(file: Option<String>, allow_net: bool, allow_fs: bool, wall_time: Option<u64>) {
    let cfg = Config::load();
    let source = match read_source(file.as_deref()) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{} {}", "Error:".red(), e);
            std::process::exit(1);
        }
    };

    let mut limits: ResourceLimits = cfg.limits.to_limits();
    limits.network_allowed = limits.network_allowed || allow_net;
    limits.filesystem_allowed = limits.filesystem_allowed || allow_fs;
    if let Some(secs) = wall_time {
        limits.max_wall_time = Duration::from_secs(secs);
    }

    let sandbox = ProcessSandbox::new();
    let fragment = SourceFragment::new(&source);
    match sandbox.execute(&fragment, &limits) {
        Ok(result) => {
            println!(
                "{} {} ({:.2}s, peak {} KB)",
                "status:".bold(),
                result.status,
                result.wall_time.as_secs_f64(),
                result.peak_memory / 1024
            );
            if !result.stdout.is_empty() {
                println!("{}\n{}", "stdout:".bold(), result.stdout);
            }
            if !result.stderr.is_empty() {
                eprintln!("{}\n{}", "stderr:".bold(), result.stderr);
            }
            if let Some(trace) = &result.exception_trace {
                eprintln!("{}\n{}", "trace:".red(), trace);
            }
        }
        Err(e) => {
            eprintln!("{} {}", "Error:".red(), e);
            std::process::exit(1);
        }
    }
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Review {
            file,
            model,
            max_iterations,
            no_fix,
        } => run_review(file, model, max_iterations, no_fix),
        Commands::Check { file } => run_check(file),
        Commands::Run {
            file,
            allow_net,
            allow_fs,
            wall_time,
        } => run_sandboxed(file, allow_net, allow_fs, wall_time),
        Commands::Config => {
            let config = Config::load();
            println!("{}", "Current configuration:".bold());
            println!();
            match config.to_toml() {
                Ok(s) => println!("{}", s),
                Err(e) => eprintln!("Error serializing config: {}", e),
            }
        }
    }
}
