//! Contract ABIs for both ledgers
//!
//! Uses alloy's sol! macro to generate type-safe bindings.

#![allow(clippy::too_many_arguments)]

use alloy::sol;

sol! {
    /// Request contract on the coin chain. Users lock coin here to request
    /// points; the relay emits coin from it for point-side requests.
    #[sol(rpc)]
    contract CoinToHPoint {
        /// Ordered backlog of unsettled requests, as three paired columns
        function getPendingList() external view returns (
            address[] memory requesters,
            address[] memory receivers,
            uint256[] memory amounts
        );

        /// Settle a prefix of the pending list with the counter-chain tx hash
        function addTxHash(
            address[] calldata requesters,
            address[] calldata receivers,
            uint256[] calldata amounts,
            bytes32 txHash
        ) external;

        /// Pay out coin for requests recorded on the point chain
        function emitErc20Token(address[] calldata receivers, uint256[] calldata amounts) external;

        event RequestRecorded(address requester, address toAddrOnKlaytn, uint256 amount);
    }
}

sol! {
    /// Request contract on the point chain
    #[sol(rpc)]
    contract HPointToCoin {
        function getPendingList() external view returns (
            address[] memory requesters,
            address[] memory receivers,
            uint256[] memory amounts
        );

        function addTxHash(
            address[] calldata requesters,
            address[] calldata receivers,
            uint256[] calldata amounts,
            bytes32 txHash
        ) external;

        event RequestRecorded(address requester, address toAddrOnCoin, uint256 amount);
    }
}

sol! {
    /// KIP-7 point token logic, called through its proxy address
    #[sol(rpc)]
    contract KIP7Logic {
        function mintMultiple(address[] calldata receivers, uint256[] calldata amounts) external;
    }
}
