pub mod ai_service; // Analyzer trait + error taxonomy
pub mod connectivity;
pub mod gemini; // Google Gemini vision client

pub use ai_service::{AnalysisError, BottleAnalyzer};
pub use connectivity::{ConnectivityMonitor, ConnectivityOverride, OverridableConnectivity, StaticConnectivity, TcpProbe};
pub use gemini::GeminiService;
