pub mod onchain;
pub mod rest_signed;
pub mod router;
pub mod solana;

pub use onchain::OnChainAdapter;
pub use rest_signed::RestSignedAdapter;
pub use router::VenueRouter;
pub use solana::SolanaAdapter;
