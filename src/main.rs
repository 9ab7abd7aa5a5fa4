fn main() -> anyhow::Result<()> {
    quotes_tui::cli::run()
}
