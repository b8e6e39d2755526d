//! node-wide parameters
//!
//! the values streamed to wallets by the params query, plus the proof-of-work
//! difficulties the transact server enforces. loaded once at startup and
//! shared read-only through the node context.

/// value limits and donation schedule enforced by the proof system
#[derive(Debug, Clone)]
pub struct ProofParams {
    pub outvalmin: u32,
    pub outvalmax: u32,
    pub invalmax: u32,
    pub minimum_donation_fp: u64,
    pub donation_per_tx_fp: u64,
    pub donation_per_byte_fp: u64,
    pub donation_per_output_fp: u64,
    pub donation_per_input_fp: u64,
    pub donation_per_xcx_req_fp: u64,
}

impl Default for ProofParams {
    fn default() -> Self {
        Self {
            outvalmin: 23,
            outvalmax: 64,
            invalmax: 64,
            minimum_donation_fp: 0,
            donation_per_tx_fp: 0,
            donation_per_byte_fp: 0,
            donation_per_output_fp: 0,
            donation_per_input_fp: 0,
            donation_per_xcx_req_fp: 0,
        }
    }
}

/// exchange-mining parameters streamed by the mining-info query
#[derive(Debug, Clone, Default)]
pub struct MiningInfo {
    pub mining_start_time: u64,
    pub mining_update_time_increment: u64,
    pub total_mined: u128,
    pub total_remaining_to_mine: u128,
    pub mining_amount_multiplier: f64,
    pub mineable_amount_increment: u128,
    pub currently_mineable_amount: u128,
    pub max_currently_mineable_amount: u128,
    pub mining_max_fraction_per_match: f64,
    pub mining_min_fraction_per_match: f64,
    pub avg_amount: f64,
    pub avg_match_rate: f64,
    pub avg_match_rate_required: f64,
}

#[derive(Debug, Clone)]
pub struct NodeParams {
    /// chain id; 1 is mainnet, everything else a testnet
    pub blockchain: u64,
    pub server_version: u32,
    pub protocol_version: u32,
    pub params_last_modified_level: u64,
    /// default domain for new output billets
    pub default_domain: u32,
    /// whether the founding mint era applies on this chain
    pub implement_mint: bool,
    pub tx_work_difficulty: u64,
    pub xcx_naked_buy_work_difficulty: u64,
    pub xcx_pay_work_difficulty: u64,
    pub amount_bits: u32,
    pub asset_bits: u32,
    pub donation_bits: u32,
    pub exponent_bits: u32,
    pub proof_params: ProofParams,
    pub mining: MiningInfo,
}

impl Default for NodeParams {
    fn default() -> Self {
        Self {
            blockchain: 1,
            server_version: 1,
            protocol_version: 1,
            params_last_modified_level: 0,
            default_domain: 1,
            implement_mint: false,
            tx_work_difficulty: 0,
            xcx_naked_buy_work_difficulty: 0,
            xcx_pay_work_difficulty: 0,
            amount_bits: 64,
            asset_bits: 32,
            donation_bits: 16,
            exponent_bits: 5,
            proof_params: ProofParams::default(),
            mining: MiningInfo::default(),
        }
    }
}

impl NodeParams {
    pub fn is_testnet(&self) -> bool {
        shroud_core::is_testnet(self.blockchain)
    }
}
