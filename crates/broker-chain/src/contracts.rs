//! Minimal ABI surface of the on-chain settlement contract the broker's
//! write operations call into, declared with the usual
//! `alloy_sol_macro::sol! { interface { ... } }` pattern. We only need the
//! handful of functions the broker itself calls, not the full contract.

use alloy_sol_macro::sol;

sol! {
    interface OrionBroker {
        function depositETH() external payable;
        function depositERC20(address asset, uint256 amount) external;
        function withdraw(address asset, uint256 amount) external;
        function approve(address asset, uint256 amount) external;
        function lockStake(uint256 amount) external;
        function releaseStake() external;
    }
}
