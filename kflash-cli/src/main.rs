fn main() -> anyhow::Result<()> {
    kflash_cli::run()
}
