use cdcwatch_consumer::server::CdcConsumerServer;
use cdcwatch_result::errors::BoxedErr;

#[tokio::main]
async fn main() -> Result<(), BoxedErr> {
  let server = CdcConsumerServer::new().await;

  match server {
    Ok(srv) => srv.run().await,
    Err(e) => Err(e),
  }
}
