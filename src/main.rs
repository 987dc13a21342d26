fn main() {
    if handle_cli_flags() {
        return;
    }

    // Off unless BUMAVIEW_LOG is set; log lines would tear the TUI.
    if let Ok(filter) = std::env::var("BUMAVIEW_LOG") {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
            .with_writer(std::io::stderr)
            .try_init();
    }

    if let Err(err) = bumaview_tui::run() {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags() -> bool {
    let mut saw_flag = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("bumaview-tui {}", bumaview_tui::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!(
                    "bumaview-tui - Browse interview questions from the terminal.\n\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message"
                );
                saw_flag = true;
            }
            _ => {}
        }
    }
    saw_flag
}
