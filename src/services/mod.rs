pub mod nozzle_client;
