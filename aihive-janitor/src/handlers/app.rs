pub async fn index() -> &'static str {
    "aihive janitor"
}
