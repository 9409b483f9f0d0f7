use std::process::ExitCode;

fn main() -> ExitCode {
    oi_cli::run()
}
