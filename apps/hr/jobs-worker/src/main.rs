//! HR Jobs Worker - Entry Point
//!
//! Background worker that runs the resume, email, analytics and report queues.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    hr_jobs_worker::run().await
}
