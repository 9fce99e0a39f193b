mod mock_store;
mod simulation;
