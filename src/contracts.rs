//! Bridge contract ABI definition
//!
//! Uses alloy's sol! macro to generate type-safe bindings. The same contract
//! is deployed on both chains: the source instance emits `BridgeRequested`,
//! the destination instance exposes `release`.

#![allow(clippy::too_many_arguments)]

use alloy::sol;

sol! {
    /// Lock/release bridge contract interface
    #[sol(rpc)]
    contract Bridge {
        /// Release bridged funds on the destination chain.
        /// Reverts when `nonce` was already released.
        function release(address token, address to, uint256 amount, uint256 nonce) external;

        /// Emitted on the source chain when a user locks funds
        event BridgeRequested(
            address indexed from,
            address indexed to,
            address srcToken,
            address dstToken,
            uint256 srcAmount,
            uint256 dstAmount,
            uint256 nonce,
            uint256 destChainId
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::keccak256;
    use alloy::sol_types::SolEvent;

    #[test]
    fn test_bridge_requested_signature_hash() {
        assert_eq!(
            Bridge::BridgeRequested::SIGNATURE_HASH,
            keccak256(
                b"BridgeRequested(address,address,address,address,uint256,uint256,uint256,uint256)"
            )
        );
    }
}
