mod driver;
mod runner;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    runner::main(std::env::args().collect())
}
