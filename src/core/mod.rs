pub mod bluetooth;

pub use bluetooth::BluetoothManager;
