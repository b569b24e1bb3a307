pub mod operation_service;
