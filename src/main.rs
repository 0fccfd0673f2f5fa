use shellharness::app::{Options, execute};

fn main() {
    std::process::exit(execute(Options::from_env()));
}
