//! ERC20 wire contract used by the relayer.

use alloy::sol;

sol! {
	/// Subset of ERC20 the relayer calls.
	#[derive(Debug, PartialEq, Eq)]
	interface IERC20 {
		function balanceOf(address account) external view returns (uint256);
		function allowance(address owner, address spender) external view returns (uint256);
		function transferFrom(address from, address to, uint256 amount) external returns (bool);
	}

	/// OpenZeppelin ERC-6093 custom errors.
	#[derive(Debug, PartialEq, Eq)]
	interface IERC20Errors {
		error ERC20InsufficientBalance(address sender, uint256 balance, uint256 needed);
		error ERC20InsufficientAllowance(address spender, uint256 allowance, uint256 needed);
	}
}
