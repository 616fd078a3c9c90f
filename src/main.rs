fn main() -> anyhow::Result<()> {
    afisha_sync::run()
}
